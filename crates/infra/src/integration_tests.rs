//! Integration tests for the provisioning pipeline.
//!
//! Tests: Identity → OwnershipVerifier → ProvisioningEngine → Directory
//!
//! Verifies:
//! - Multi-statement workflows are all-or-nothing
//! - Ownership is re-read from the store on every call
//! - Registry uniqueness holds under concurrent creates
//! - Sessions follow principal liveness

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use stratum_auth::{
        CredentialPolicy, Identity, OwnershipVerifier, PasswordGenerator, PasswordHasher, Target, TokenAuthenticator,
        VerifyError,
    };
    use stratum_core::{AdminError, Entity, ListQuery, NodeId, NodeKind, PrincipalId, Role, SubordinateKind, UnitsLedger};

    use crate::directory::in_memory::DirectoryStats;
    use crate::directory::{
        Directory, DirectoryTx, InMemoryDirectory, NewPrincipal, NewSuccession, PrincipalRow, RemovedHead, StoreError,
        SuccessionRecord, Subtree, Summary, UnitRecord,
    };
    use crate::{
        CatalogService, CreateSubordinate, CredentialDispatcher, InMemoryOutbox, Provisioned, ProvisioningEngine,
        ReplaceHead, SessionService,
    };

    fn policy() -> CredentialPolicy {
        // Minimum bcrypt cost keeps the suite fast.
        CredentialPolicy::new(PasswordGenerator::default(), PasswordHasher::new(4))
    }

    fn engine(directory: Arc<dyn Directory>, outbox: &InMemoryOutbox, tx_timeout: Duration) -> ProvisioningEngine {
        let dispatcher = CredentialDispatcher::spawn(Arc::new(outbox.clone()));
        ProvisioningEngine::new(directory, policy(), dispatcher, tx_timeout)
    }

    fn create(kind: SubordinateKind, node_name: Option<&str>, email: &str) -> CreateSubordinate {
        CreateSubordinate {
            kind,
            node_name: node_name.map(str::to_string),
            head_name: format!("Head of {email}"),
            head_email: email.to_string(),
        }
    }

    fn identity_of(p: &Provisioned) -> Identity {
        Identity::new(p.principal_id, p.email.clone(), p.role)
    }

    fn node_of(p: &Provisioned) -> NodeId {
        p.node_id.unwrap()
    }

    async fn seed(dir: &InMemoryDirectory, role: Role, supervisor: Option<PrincipalId>, email: &str) -> Identity {
        let id = dir
            .seed_principal(NewPrincipal {
                role,
                supervisor_id: supervisor.map(|s| s.get()),
                name: email.to_string(),
                email: email.to_string(),
                password_hash: "seeded".to_string(),
            })
            .await
            .unwrap();
        Identity::new(id, email, role)
    }

    async fn mailed_password(outbox: &InMemoryOutbox, email: &str) -> String {
        for _ in 0..200 {
            if let Some(pw) = outbox.password_for(email) {
                return pw;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no credentials were mailed to {email}");
    }

    /// Company → Organisation → SuperAdmin, seeded directly.
    struct Fixture {
        dir: Arc<InMemoryDirectory>,
        outbox: InMemoryOutbox,
        engine: ProvisioningEngine,
        company: Identity,
        super_admin: Identity,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = InMemoryDirectory::arc();
            let company = seed(&dir, Role::Company, None, "root@x.com").await;
            let org = seed(&dir, Role::Organisation, Some(company.principal_id), "org@x.com").await;
            let super_admin = seed(&dir, Role::SuperAdmin, Some(org.principal_id), "sa@x.com").await;
            let outbox = InMemoryOutbox::new();
            let engine = engine(dir.clone(), &outbox, Duration::from_secs(5));
            Self {
                dir,
                outbox,
                engine,
                company,
                super_admin,
            }
        }

        async fn branch(&self, head_email: &str) -> Provisioned {
            self.engine
                .create_subordinate(
                    &self.super_admin,
                    create(SubordinateKind::Branch, Some("Branch"), head_email),
                )
                .await
                .unwrap()
        }

        async fn under(&self, caller: &Identity, kind: SubordinateKind, email: &str) -> Provisioned {
            let node_name = kind.node().map(|_| "Node");
            self.engine
                .create_subordinate(caller, create(kind, node_name, email))
                .await
                .unwrap()
        }
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Fault {
        FailSuccession,
        FailPrincipalInsert,
        StallSuccession,
    }

    /// Delegates to an in-memory directory but sabotages one statement.
    struct FaultyDirectory {
        inner: Arc<InMemoryDirectory>,
        fault: Fault,
    }

    struct FaultyTx {
        inner: Box<dyn DirectoryTx>,
        fault: Fault,
    }

    fn injected() -> StoreError {
        StoreError::Backend("injected failure".to_string())
    }

    #[async_trait]
    impl DirectoryTx for FaultyTx {
        async fn register_email(&mut self, email: &str, role: Role) -> Result<(), StoreError> {
            self.inner.register_email(email, role).await
        }
        async fn unregister_email(&mut self, email: &str) -> Result<(), StoreError> {
            self.inner.unregister_email(email).await
        }
        async fn insert_node(&mut self, kind: NodeKind, parent_id: i64, name: &str) -> Result<NodeId, StoreError> {
            self.inner.insert_node(kind, parent_id, name).await
        }
        async fn insert_principal(&mut self, principal: &NewPrincipal) -> Result<PrincipalId, StoreError> {
            if self.fault == Fault::FailPrincipalInsert {
                return Err(injected());
            }
            self.inner.insert_principal(principal).await
        }
        async fn delete_head(
            &mut self,
            node: NodeKind,
            node_id: NodeId,
            email: &str,
        ) -> Result<Option<RemovedHead>, StoreError> {
            self.inner.delete_head(node, node_id, email).await
        }
        async fn insert_succession(&mut self, record: &NewSuccession) -> Result<SuccessionRecord, StoreError> {
            match self.fault {
                Fault::FailSuccession => Err(injected()),
                Fault::StallSuccession => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    self.inner.insert_succession(record).await
                }
                Fault::FailPrincipalInsert => self.inner.insert_succession(record).await,
            }
        }
        async fn create_units_ledger(&mut self, component: PrincipalId) -> Result<UnitsLedger, StoreError> {
            self.inner.create_units_ledger(component).await
        }
        async fn collect_subtree(&mut self, entity: Entity, id: i64) -> Result<Subtree, StoreError> {
            self.inner.collect_subtree(entity, id).await
        }
        async fn delete_row(&mut self, entity: Entity, id: i64) -> Result<bool, StoreError> {
            self.inner.delete_row(entity, id).await
        }
        async fn drop_units_ledger(&mut self, ledger: &UnitsLedger) -> Result<(), StoreError> {
            self.inner.drop_units_ledger(ledger).await
        }
        async fn commit(&mut self) -> Result<(), StoreError> {
            self.inner.commit().await
        }
        async fn rollback(&mut self) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    #[async_trait]
    impl OwnershipVerifier for FaultyDirectory {
        async fn verify(&self, identity: &Identity, target: &Target) -> Result<bool, VerifyError> {
            self.inner.verify(identity, target).await
        }
    }

    #[async_trait]
    impl Directory for FaultyDirectory {
        async fn begin(&self) -> Result<Box<dyn DirectoryTx>, StoreError> {
            Ok(Box::new(FaultyTx {
                inner: self.inner.begin().await?,
                fault: self.fault,
            }))
        }
        async fn resolve(&self, identity: &Identity) -> Result<Option<PrincipalRow>, StoreError> {
            self.inner.resolve(identity).await
        }
        async fn find_by_email(&self, email: &str) -> Result<Option<PrincipalRow>, StoreError> {
            self.inner.find_by_email(email).await
        }
        async fn update_password(&self, identity: &Identity, password_hash: &str) -> Result<bool, StoreError> {
            self.inner.update_password(identity, password_hash).await
        }
        async fn list_owned(
            &self,
            identity: &Identity,
            entity: Entity,
            query: &ListQuery,
        ) -> Result<Vec<Summary>, StoreError> {
            self.inner.list_owned(identity, entity, query).await
        }
        async fn list_successions(
            &self,
            node: NodeKind,
            node_id: NodeId,
        ) -> Result<Vec<SuccessionRecord>, StoreError> {
            self.inner.list_successions(node, node_id).await
        }
        async fn units_ledger(&self, component: PrincipalId) -> Result<Option<UnitsLedger>, StoreError> {
            self.inner.units_ledger(component).await
        }
        async fn record_unit(
            &self,
            ledger: &UnitsLedger,
            serial: &str,
            note: Option<&str>,
        ) -> Result<UnitRecord, StoreError> {
            self.inner.record_unit(ledger, serial, note).await
        }
        async fn list_units(&self, ledger: &UnitsLedger, limit: u32, offset: u32) -> Result<Vec<UnitRecord>, StoreError> {
            self.inner.list_units(ledger, limit, offset).await
        }
    }

    fn faulty(fx: &Fixture, fault: Fault, tx_timeout: Duration) -> ProvisioningEngine {
        let dir = Arc::new(FaultyDirectory {
            inner: fx.dir.clone(),
            fault,
        });
        engine(dir, &fx.outbox, tx_timeout)
    }

    fn replace(old: &str, new: &str) -> ReplaceHead {
        ReplaceHead {
            old_head_email: old.to_string(),
            new_head_name: "Successor".to_string(),
            new_head_email: new.to_string(),
        }
    }

    #[tokio::test]
    async fn failed_replace_head_leaves_the_old_head_in_place() {
        let fx = Fixture::new().await;
        let branch = fx.branch("bh@x.com").await;
        let bh = identity_of(&branch);
        let dept = fx.under(&bh, SubordinateKind::Department, "d@x.com").await;
        let before = fx.dir.stats().await;

        let broken = faulty(&fx, Fault::FailSuccession, Duration::from_secs(5));
        let err = broken
            .replace_head(&bh, NodeKind::Department, node_of(&dept), replace("d@x.com", "d2@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Transient(_)));

        assert_eq!(fx.dir.stats().await, before);
        assert!(fx.dir.resolve(&identity_of(&dept)).await.unwrap().is_some());
        assert_eq!(fx.dir.registered_role("d@x.com").await, Some(Role::DepartmentHead));
        assert_eq!(fx.dir.registered_role("d2@x.com").await, None);

        // Retried in isolation, the whole operation succeeds.
        let succession = fx
            .engine
            .replace_head(&bh, NodeKind::Department, node_of(&dept), replace("d@x.com", "d2@x.com"))
            .await
            .unwrap();
        assert_eq!(succession.record.old_principal_id, dept.principal_id);
        assert_eq!(succession.record.performed_by_id, bh.principal_id);
        assert_eq!(fx.dir.registered_role("d@x.com").await, None);
        assert_eq!(fx.dir.registered_role("d2@x.com").await, Some(Role::DepartmentHead));
    }

    #[tokio::test]
    async fn failed_create_registers_nothing() {
        let fx = Fixture::new().await;
        let before = fx.dir.stats().await;

        let broken = faulty(&fx, Fault::FailPrincipalInsert, Duration::from_secs(5));
        let err = broken
            .create_subordinate(&fx.super_admin, create(SubordinateKind::Branch, Some("North"), "bh@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Transient(_)));
        assert_eq!(fx.dir.stats().await, before);
        assert_eq!(fx.dir.registered_role("bh@x.com").await, None);
    }

    #[tokio::test]
    async fn stalled_transaction_times_out_and_rolls_back() {
        let fx = Fixture::new().await;
        let branch = fx.branch("bh@x.com").await;
        let before = fx.dir.stats().await;

        let slow = faulty(&fx, Fault::StallSuccession, Duration::from_millis(50));
        let err = slow
            .replace_head(&fx.super_admin, NodeKind::Branch, node_of(&branch), replace("bh@x.com", "bh2@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Transient(_)));

        // The lock was released and nothing changed.
        assert_eq!(fx.dir.stats().await, before);
        assert!(fx.dir.resolve(&identity_of(&branch)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ownership_is_not_cached_across_removal() {
        let fx = Fixture::new().await;
        let branch = fx.branch("bh@x.com").await;
        let bh = identity_of(&branch);
        let dept = fx.under(&bh, SubordinateKind::Department, "d@x.com").await;
        let target = Target::node(NodeKind::Department, node_of(&dept));

        assert!(fx.dir.verify(&bh, &target).await.unwrap());

        fx.engine
            .remove(&fx.super_admin, Target::node(NodeKind::Branch, node_of(&branch)))
            .await
            .unwrap();

        assert!(!fx.dir.verify(&bh, &target).await.unwrap());
        assert!(!fx.dir.verify(&bh, &Target::Myself).await.unwrap());
        assert_eq!(fx.dir.registered_role("bh@x.com").await, None);
        assert_eq!(fx.dir.registered_role("d@x.com").await, None);
    }

    #[tokio::test]
    async fn listing_requires_a_live_caller_row() {
        let fx = Fixture::new().await;
        let catalog = CatalogService::new(fx.dir.clone());
        let branch = fx.branch("bh@x.com").await;
        let bh = identity_of(&branch);
        fx.under(&bh, SubordinateKind::Department, "d@x.com").await;

        let departments = Entity::Node(NodeKind::Department);
        let listed = catalog.list_subordinates(&bh, departments, ListQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 1);

        // Same id, different email: the token no longer describes a live row.
        let impostor = Identity::new(bh.principal_id, "other@x.com", bh.role);
        assert_eq!(
            catalog.list_subordinates(&impostor, departments, ListQuery::default()).await,
            Err(AdminError::Unauthorized)
        );

        fx.engine
            .remove(&fx.super_admin, Target::node(NodeKind::Branch, node_of(&branch)))
            .await
            .unwrap();
        assert_eq!(
            catalog.list_subordinates(&bh, departments, ListQuery::default()).await,
            Err(AdminError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn concurrent_creates_with_one_email_yield_one_principal() {
        let fx = Fixture::new().await;
        let branch = fx.branch("bh@x.com").await;
        let dept = fx.under(&identity_of(&branch), SubordinateKind::Department, "d@x.com").await;
        let dh = identity_of(&dept);

        let engine = Arc::new(fx.engine);
        let attempts = (0..4).map(|_| {
            let engine = engine.clone();
            let dh = dh.clone();
            tokio::spawn(async move {
                engine
                    .create_subordinate(&dh, create(SubordinateKind::Workspace, None, "ws@x.com"))
                    .await
            })
        });

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in attempts.collect::<Vec<_>>() {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(AdminError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((ok, conflicts), (1, 3));
    }

    #[tokio::test]
    async fn an_email_cannot_hold_two_roles() {
        let fx = Fixture::new().await;
        let err = fx
            .engine
            .create_subordinate(&fx.super_admin, create(SubordinateKind::Branch, Some("North"), "org@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Conflict(_)));
    }

    #[tokio::test]
    async fn provisioned_head_logs_in_with_mailed_password() {
        let fx = Fixture::new().await;
        let branch = fx.branch("bh@x.com").await;
        let dept = fx
            .under(&identity_of(&branch), SubordinateKind::Department, "D@X.com")
            .await;
        assert_eq!(dept.email, "d@x.com");
        assert_eq!(dept.role, Role::DepartmentHead);

        let tokens = Arc::new(TokenAuthenticator::new(
            b"integration-secret",
            Duration::from_secs(900),
            Duration::from_secs(3600),
        ));
        let sessions = SessionService::new(fx.dir.clone(), tokens.clone(), policy()).unwrap();

        let password = mailed_password(&fx.outbox, "d@x.com").await;
        let pair = sessions.login("d@x.com", &password).await.unwrap();
        let claims = tokens.authenticate(&pair.access_token, chrono::Utc::now()).unwrap();
        assert_eq!(claims.identity(), identity_of(&dept));
        assert!(tokens.authenticate(&pair.refresh_token, chrono::Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let fx = Fixture::new().await;
        fx.branch("bh@x.com").await;
        let tokens = Arc::new(TokenAuthenticator::new(b"s", Duration::from_secs(60), Duration::from_secs(60)));
        let sessions = SessionService::new(fx.dir.clone(), tokens, policy()).unwrap();

        let unknown = sessions.login("nobody@x.com", "Whatever1!").await.unwrap_err();
        let wrong = sessions.login("bh@x.com", "Whatever1!").await.unwrap_err();
        let malformed = sessions.login("not-an-email", "Whatever1!").await.unwrap_err();
        assert_eq!(unknown, AdminError::Unauthorized);
        assert_eq!(wrong, unknown);
        assert_eq!(malformed, unknown);
    }

    #[tokio::test]
    async fn cross_branch_replace_is_unauthorized_and_mutates_nothing() {
        let fx = Fixture::new().await;
        let seven = identity_of(&fx.branch("bh7@x.com").await);
        let nine = identity_of(&fx.branch("bh9@x.com").await);
        let foreign = fx.under(&nine, SubordinateKind::Department, "d9@x.com").await;
        let before = fx.dir.stats().await;

        let err = fx
            .engine
            .replace_head(&seven, NodeKind::Department, node_of(&foreign), replace("d9@x.com", "evil@x.com"))
            .await
            .unwrap_err();
        assert_eq!(err, AdminError::Unauthorized);
        assert_eq!(fx.dir.stats().await, before);
        assert_eq!(fx.dir.registered_role("evil@x.com").await, None);
    }

    #[tokio::test]
    async fn replacing_a_missing_head_is_not_found_and_mutates_nothing() {
        let fx = Fixture::new().await;
        let bh = identity_of(&fx.branch("bh@x.com").await);
        let dept = fx.under(&bh, SubordinateKind::Department, "d@x.com").await;
        let before = fx.dir.stats().await;

        let err = fx
            .engine
            .replace_head(&bh, NodeKind::Department, node_of(&dept), replace("ghost@x.com", "new@x.com"))
            .await
            .unwrap_err();
        assert_eq!(err, AdminError::NotFound);
        assert_eq!(fx.dir.stats().await, before);
        assert_eq!(fx.dir.registered_role("new@x.com").await, None);
        assert!(fx
            .dir
            .list_successions(NodeKind::Department, node_of(&dept))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn only_the_designated_role_creates_each_kind() {
        let fx = Fixture::new().await;
        let err = fx
            .engine
            .create_subordinate(&fx.company, create(SubordinateKind::Branch, Some("North"), "bh@x.com"))
            .await
            .unwrap_err();
        assert_eq!(err, AdminError::Unauthorized);

        let err = fx
            .engine
            .create_subordinate(&fx.super_admin, create(SubordinateKind::Branch, None, "bh@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn removing_a_warehouse_unregisters_and_drops_its_subtree() {
        let fx = Fixture::new().await;
        let bh = identity_of(&fx.branch("bh@x.com").await);
        let warehouse = fx.under(&bh, SubordinateKind::Warehouse, "wh@x.com").await;
        let component = fx
            .under(&identity_of(&warehouse), SubordinateKind::Component, "c@x.com")
            .await;
        let ledger = UnitsLedger::for_component(component.principal_id);
        assert!(fx.dir.has_ledger(&ledger).await);

        let removed = fx
            .engine
            .remove(&bh, Target::node(NodeKind::Warehouse, node_of(&warehouse)))
            .await
            .unwrap();
        assert_eq!(removed.principals_removed, 2);
        assert_eq!(fx.dir.registered_role("wh@x.com").await, None);
        assert_eq!(fx.dir.registered_role("c@x.com").await, None);
        assert!(!fx.dir.has_ledger(&ledger).await);

        // Heads are replaced, never removed.
        let err = fx
            .engine
            .remove(&bh, Target::principal(Role::BranchHead, bh.principal_id))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn successions_and_units_are_readable_by_their_owners() {
        let fx = Fixture::new().await;
        let branch = fx.branch("bh@x.com").await;
        fx.engine
            .replace_head(&fx.super_admin, NodeKind::Branch, node_of(&branch), replace("bh@x.com", "bh2@x.com"))
            .await
            .unwrap();

        let catalog = CatalogService::new(fx.dir.clone());
        let records = catalog
            .list_successions(&fx.super_admin, NodeKind::Branch, node_of(&branch))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].email, "bh@x.com");

        let branches = catalog
            .list_subordinates(&fx.super_admin, Entity::Node(NodeKind::Branch), ListQuery::default())
            .await
            .unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].id, node_of(&branch).get());

        let bh2 = Identity::new(
            fx.dir.find_by_email("bh2@x.com").await.unwrap().unwrap().id,
            "bh2@x.com",
            Role::BranchHead,
        );
        let warehouse = fx.under(&bh2, SubordinateKind::Warehouse, "wh@x.com").await;
        let component = identity_of(&fx.under(&identity_of(&warehouse), SubordinateKind::Component, "c@x.com").await);

        catalog.record_unit(&component, "SN-1", Some("first")).await.unwrap();
        let dup = catalog.record_unit(&component, "SN-1", None).await.unwrap_err();
        assert!(matches!(dup, AdminError::Conflict(_)));
        let units = catalog.list_units(&component, ListQuery::default()).await.unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].note.as_deref(), Some("first"));

        let not_a_component = catalog.list_units(&bh2, ListQuery::default()).await.unwrap_err();
        assert_eq!(not_a_component, AdminError::Unauthorized);
    }

    #[tokio::test]
    async fn bootstrap_runs_once() {
        let dir = InMemoryDirectory::arc();
        let outbox = InMemoryOutbox::new();
        let engine = engine(dir.clone(), &outbox, Duration::from_secs(5));

        assert!(engine.bootstrap_company("Acme", "root@acme.io").await.unwrap().is_some());
        assert_eq!(engine.bootstrap_company("Acme", "root@acme.io").await.unwrap(), None);
        assert_eq!(
            dir.stats().await,
            DirectoryStats {
                registry: 1,
                principals: 1,
                nodes: 0,
                successions: 0
            }
        );
        mailed_password(&outbox, "root@acme.io").await;
    }

    #[tokio::test]
    async fn sessions_follow_liveness_and_password_changes() {
        let fx = Fixture::new().await;
        let branch = fx.branch("bh@x.com").await;
        let bh = identity_of(&branch);
        let tokens = Arc::new(TokenAuthenticator::new(b"s", Duration::from_secs(60), Duration::from_secs(600)));
        let sessions = SessionService::new(fx.dir.clone(), tokens, policy()).unwrap();

        let temporary = mailed_password(&fx.outbox, "bh@x.com").await;
        let pair = sessions.login("bh@x.com", &temporary).await.unwrap();

        let weak = sessions.change_password(&bh, &temporary, "short").await.unwrap_err();
        assert!(matches!(weak, AdminError::InvalidInput(_)));
        sessions.change_password(&bh, &temporary, "N3w-Passw0rd").await.unwrap();
        assert_eq!(sessions.login("bh@x.com", &temporary).await.unwrap_err(), AdminError::Unauthorized);
        sessions.login("bh@x.com", "N3w-Passw0rd").await.unwrap();
        assert_eq!(sessions.whoami(&bh).await.unwrap(), bh);

        fx.engine
            .replace_head(&fx.super_admin, NodeKind::Branch, node_of(&branch), replace("bh@x.com", "bh2@x.com"))
            .await
            .unwrap();
        assert_eq!(sessions.refresh(&pair.refresh_token).await.unwrap_err(), AdminError::Unauthorized);
        assert_eq!(sessions.whoami(&bh).await.unwrap_err(), AdminError::Unauthorized);
    }
}
