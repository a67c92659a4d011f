use std::sync::Arc;

use forgeops_api::app::services::InMemoryBackends;
use forgeops_auth::{GrantSource, OperatorCredential, RoleCatalog, RoleDescriptor, RoleSelector};
use forgeops_core::{RoleId, TenantId, UserId};
use forgeops_events::InMemoryAuditSink;
use forgeops_infra::AesGcmSecretCipher;
use forgeops_provisioning::{DirectoryGroup, DirectoryPerson, ProvisioningStore};
use reqwest::StatusCode;
use serde_json::{json, Value};

const TOKEN: &str = "tenant-provisioning-token";
const OPERATOR_TOKEN: &str = "operator-token";

struct TestServer {
    base_url: String,
    tenant: TenantId,
    admins_role: RoleId,
    backends: InMemoryBackends,
    audit: Arc<InMemoryAuditSink>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let audit = Arc::new(InMemoryAuditSink::new());
        let backends = InMemoryBackends::new(AesGcmSecretCipher::new([42u8; 32]), audit.clone());

        let tenant = TenantId::new();
        backends.install_token(tenant, TOKEN, None).unwrap();

        let admins_role = RoleId::new();
        backends.catalogs.set(
            tenant,
            RoleCatalog::new(vec![RoleDescriptor::new(
                admins_role,
                "Admins",
                RoleSelector::Pattern("*-Admins".into()),
            )]),
        );

        // Build app (same router as prod), but bind to an ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let services = backends
            .services(base_url.clone())
            .with_operator(Some(OperatorCredential::new(OPERATOR_TOKEN)));
        let app = forgeops_api::app::build_app(Arc::new(services));
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            tenant,
            admins_role,
            backends,
            audit,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/scim/v2/{}{}", self.base_url, self.tenant, path)
    }

    fn user(&self, name: &str) -> UserId {
        self.backends.users.insert(self.tenant, name)
    }

    async fn create(&self, client: &reqwest::Client, name: &str, members: &[UserId]) -> reqwest::Response {
        client
            .post(self.url("/Groups"))
            .bearer_auth(TOKEN)
            .json(&json!({
                "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
                "displayName": name,
                "members": members.iter().map(|m| json!({ "value": m.to_string() })).collect::<Vec<_>>(),
            }))
            .send()
            .await
            .unwrap()
    }

    async fn patch(&self, client: &reqwest::Client, id: &str, operations: Value) -> reqwest::Response {
        client
            .patch(self.url(&format!("/Groups/{id}")))
            .bearer_auth(TOKEN)
            .json(&json!({
                "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
                "Operations": operations,
            }))
            .send()
            .await
            .unwrap()
    }

    async fn sync(&self, client: &reqwest::Client) -> reqwest::Response {
        client
            .post(self.url("/internal/directory-sync"))
            .bearer_auth(OPERATOR_TOKEN)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn member_values(group: &Value) -> Vec<String> {
    let mut values: Vec<String> = group["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["value"].as_str().unwrap().to_string())
        .collect();
    values.sort();
    values
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_scim_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/Groups")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["schemas"][0], "urn:ietf:params:scim:api:messages:2.0:Error");
    assert_eq!(body["status"], "401");
    assert!(body["detail"].is_string());

    let res = client.get(srv.url("/Groups")).bearer_auth("wrong").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // A valid token for one tenant does not open another.
    let other = format!("{}/scim/v2/{}/Groups", srv.base_url, TenantId::new());
    let res = client.get(other).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let bogus = format!("{}/scim/v2/not-a-tenant/Groups", srv.base_url);
    let res = client.get(bogus).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rejected_request_changes_nothing() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/Groups"))
        .bearer_auth("wrong")
        .json(&json!({ "displayName": "Org-Admins" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(srv.backends.store.list_groups(srv.tenant).await.unwrap().is_empty());
    assert!(srv.audit.events().is_empty());
}

#[tokio::test]
async fn create_is_idempotent_by_display_name() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = srv.create(&client, "Engineering", &[]).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(
        res.headers()["content-type"].to_str().unwrap(),
        "application/scim+json"
    );
    assert!(res.headers().contains_key("location"));
    let first: Value = res.json().await.unwrap();
    assert_eq!(first["displayName"], "Engineering");
    assert_eq!(first["meta"]["resourceType"], "Group");

    let res = srv.create(&client, "Engineering", &[]).await;
    assert_eq!(res.status(), StatusCode::OK);
    let second: Value = res.json().await.unwrap();
    assert_eq!(second["id"], first["id"]);

    assert_eq!(srv.backends.store.list_groups(srv.tenant).await.unwrap().len(), 1);
}

#[tokio::test]
async fn create_without_display_name_is_bad_request() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/Groups"))
        .bearer_auth(TOKEN)
        .json(&json!({ "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["scimType"], "invalidValue");
    assert_eq!(body["status"], "400");

    let res = client
        .post(srv.url("/Groups"))
        .bearer_auth(TOKEN)
        .header("content-type", "application/scim+json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admins_group_grants_and_revokes_the_mapped_role() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let u1 = srv.user("u1");

    let res = srv.create(&client, "Org-Admins", &[u1]).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let group: Value = res.json().await.unwrap();
    let id = group["id"].as_str().unwrap().to_string();
    assert_eq!(member_values(&group), vec![u1.to_string()]);
    assert_eq!(group["members"][0]["display"], "u1");

    let grants = srv.backends.store.grants_for(srv.tenant, u1).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].role_id, srv.admins_role);
    assert_eq!(grants[0].source.origin_group().map(|g| g.to_string()), Some(id.clone()));

    let res = srv
        .patch(
            &client,
            &id,
            json!([{ "op": "remove", "path": format!("members[value eq \"{u1}\"]") }]),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let group: Value = res.json().await.unwrap();
    assert!(member_values(&group).is_empty());

    assert!(srv.backends.store.grants_for(srv.tenant, u1).await.unwrap().is_empty());
}

#[tokio::test]
async fn patch_skips_unknown_principals_and_malformed_operations() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let known = srv.user("known");
    let unknown = UserId::new();

    let created: Value = srv.create(&client, "Finance", &[]).await.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let res = srv
        .patch(
            &client,
            &id,
            json!([
                { "op": "add", "path": "members", "value": [{ "value": unknown.to_string() }] },
                { "op": "frobnicate", "path": "members" },
                { "op": "add", "path": "members", "value": [{ "value": known.to_string() }] },
            ]),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let group: Value = res.json().await.unwrap();
    assert_eq!(member_values(&group), vec![known.to_string()]);
}

#[tokio::test]
async fn patch_rename_and_path_less_add() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let u1 = srv.user("u1");

    let created: Value = srv.create(&client, "Platform", &[]).await.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let res = srv
        .patch(
            &client,
            &id,
            json!([
                { "op": "add", "value": { "members": [{ "value": u1.to_string() }] } },
                { "op": "replace", "path": "displayName", "value": "Platform-Admins" },
            ]),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let group: Value = res.json().await.unwrap();
    assert_eq!(group["displayName"], "Platform-Admins");
    assert_eq!(member_values(&group), vec![u1.to_string()]);

    // Renaming into the catalog's pattern grants the role to existing members.
    let grants = srv.backends.store.grants_for(srv.tenant, u1).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].role_id, srv.admins_role);
}

#[tokio::test]
async fn replace_converges_members_and_keeps_manual_grants() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let [a, b, c] = ["a", "b", "c"].map(|n| srv.user(n));

    srv.backends
        .store
        .insert_manual_grant(srv.tenant, a, srv.admins_role, chrono::Utc::now())
        .await
        .unwrap();

    let created: Value = srv.create(&client, "Ops-Admins", &[a, b]).await.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let res = client
        .put(srv.url(&format!("/Groups/{id}")))
        .bearer_auth(TOKEN)
        .json(&json!({
            "displayName": "Ops-Admins",
            "members": [{ "value": b.to_string() }, { "value": c.to_string() }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let group: Value = res.json().await.unwrap();
    let mut expected = vec![b.to_string(), c.to_string()];
    expected.sort();
    assert_eq!(member_values(&group), expected);

    let a_grants = srv.backends.store.grants_for(srv.tenant, a).await.unwrap();
    assert_eq!(a_grants.len(), 1);
    assert_eq!(a_grants[0].source, GrantSource::Manual);
    assert_eq!(srv.backends.store.grants_for(srv.tenant, c).await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_returns_no_content_and_removes_only_sync_grants() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let u1 = srv.user("u1");

    srv.backends
        .store
        .insert_manual_grant(srv.tenant, u1, srv.admins_role, chrono::Utc::now())
        .await
        .unwrap();
    let created: Value = srv.create(&client, "Org-Admins", &[u1]).await.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(srv.backends.store.grants_for(srv.tenant, u1).await.unwrap().len(), 2);

    let res = client
        .delete(srv.url(&format!("/Groups/{id}")))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(res.bytes().await.unwrap().is_empty());

    let grants = srv.backends.store.grants_for(srv.tenant, u1).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert!(grants[0].source.is_manual());

    let res = client
        .get(srv.url(&format!("/Groups/{id}")))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "404");
}

#[tokio::test]
async fn unknown_group_is_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let missing = uuid::Uuid::now_v7();

    let res = client
        .get(srv.url(&format!("/Groups/{missing}")))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = srv
        .patch(&client, &missing.to_string(), json!([{ "op": "remove", "path": "members" }]))
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/Groups/not-a-uuid"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_by_display_name_and_paginates() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    for name in ["Alpha", "Bravo", "Charlie"] {
        assert_eq!(srv.create(&client, name, &[]).await.status(), StatusCode::CREATED);
    }

    let res = client
        .get(srv.url("/Groups"))
        .query(&[("filter", r#"displayName eq "bravo""#)])
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["schemas"][0], "urn:ietf:params:scim:api:messages:2.0:ListResponse");
    assert_eq!(body["totalResults"], 1);
    assert_eq!(body["Resources"][0]["displayName"], "Bravo");

    // Unsupported filters fall back to the full list.
    let body: Value = client
        .get(srv.url("/Groups"))
        .query(&[("filter", r#"displayName co "a""#)])
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["totalResults"], 3);

    let body: Value = client
        .get(srv.url("/Groups"))
        .query(&[("startIndex", "2"), ("count", "1")])
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["totalResults"], 3);
    assert_eq!(body["startIndex"], 2);
    assert_eq!(body["itemsPerPage"], 1);
    assert_eq!(body["Resources"][0]["displayName"], "Bravo");
}

#[tokio::test]
async fn discovery_documents_describe_groups() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(srv.url("/ResourceTypes"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["Resources"][0]["id"], "Group");
    assert_eq!(body["Resources"][0]["endpoint"], "/Groups");

    let body: Value = client
        .get(srv.url("/ServiceProviderConfig"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["patch"]["supported"], true);
    assert_eq!(body["bulk"]["supported"], false);
}

#[tokio::test]
async fn directory_sync_endpoint_reports_and_flags_stale_records() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .put(srv.url("/internal/directory-selector"))
        .bearer_auth(OPERATOR_TOKEN)
        .json(&json!({ "selector": "All-Employees", "autoDelete": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let group = |members: Vec<DirectoryPerson>| DirectoryGroup {
        external_id: "grp-1".into(),
        display_name: "All-Employees".into(),
        members,
    };
    let p1 = DirectoryPerson::new("p1", "Person One");
    let p2 = DirectoryPerson::new("p2", "Person Two");
    srv.backends
        .directory
        .set_groups(srv.tenant, vec![group(vec![p1, p2.clone()])]);

    let res = srv.sync(&client).await;
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["groups_matched"], 1);
    assert_eq!(report["created"], 2);

    srv.backends.directory.set_groups(srv.tenant, vec![group(vec![p2])]);
    let report: Value = srv.sync(&client).await.json().await.unwrap();
    assert_eq!(report["flagged_stale"], 1);
    assert_eq!(report["deleted"], 0);

    let records = srv.backends.store.directory_records(srv.tenant).await.unwrap();
    assert_eq!(records.len(), 2);
    let p1_record = records.iter().find(|r| r.external_id == "p1").unwrap();
    assert!(p1_record.stale);

    // The sync path never creates role grants.
    assert!(srv.audit.of_type("provisioning.role.granted").is_empty());
}

#[tokio::test]
async fn operator_and_tenant_credentials_are_not_interchangeable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/internal/directory-sync"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .put(srv.url("/internal/directory-selector"))
        .bearer_auth(TOKEN)
        .json(&json!({ "selector": "*", "autoDelete": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(srv.backends.store.selector_config(srv.tenant).await.unwrap().is_none());

    let res = client
        .get(srv.url("/Groups"))
        .bearer_auth(OPERATOR_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn remove_with_single_member_object_keeps_other_members() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let [a, b] = ["a", "b"].map(|n| srv.user(n));

    let created: Value = srv.create(&client, "Org-Admins", &[a, b]).await.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let res = srv
        .patch(
            &client,
            &id,
            json!([{ "op": "remove", "path": "members", "value": { "value": a.to_string() } }]),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let group: Value = res.json().await.unwrap();
    assert_eq!(member_values(&group), vec![b.to_string()]);

    assert!(srv.backends.store.grants_for(srv.tenant, a).await.unwrap().is_empty());
    assert_eq!(srv.backends.store.grants_for(srv.tenant, b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn group_first_created_by_directory_sync_grants_on_pushed_add() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let u1 = srv.user("u1");

    let res = client
        .put(srv.url("/internal/directory-selector"))
        .bearer_auth(OPERATOR_TOKEN)
        .json(&json!({ "selector": "*-Admins" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    srv.backends.directory.set_groups(
        srv.tenant,
        vec![DirectoryGroup {
            external_id: "grp-org-admins".into(),
            display_name: "Org-Admins".into(),
            members: vec![DirectoryPerson::new("p1", "Person One")],
        }],
    );
    assert_eq!(srv.sync(&client).await.status(), StatusCode::OK);

    let res = srv.create(&client, "Org-Admins", &[u1]).await;
    assert_eq!(res.status(), StatusCode::OK);
    let group: Value = res.json().await.unwrap();
    let id = group["id"].as_str().unwrap().to_string();

    let res = srv
        .patch(
            &client,
            &id,
            json!([{ "op": "add", "path": "members", "value": [{ "value": u1.to_string() }] }]),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let grants = srv.backends.store.grants_for(srv.tenant, u1).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].role_id, srv.admins_role);
}
