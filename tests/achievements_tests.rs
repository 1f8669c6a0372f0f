//! Achievement creation and grants: role gates, duplicate protection, external-first ordering.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use common::{add_identity, RecordingNotifier, StaticRoles, ORGS};
use tripgate::achievements::{AchievementService, CreateAchievement, GrantAchievement};
use tripgate::identity::{AuthorizationPolicy, Identity, RoleGateway};
use tripgate::storage::SharedStore;

struct Fixture {
    store: SharedStore,
    policy: AuthorizationPolicy,
    notifier: Arc<RecordingNotifier>,
    service: AchievementService,
    org: Identity,
    member: Identity,
}

fn fixture_with(notifier: RecordingNotifier, roles: StaticRoles) -> Fixture {
    let store = SharedStore::in_memory();
    let org = add_identity(&store, "org");
    let member = add_identity(&store, "member");
    let notifier = Arc::new(notifier);
    let gateway = RoleGateway::new(Arc::new(roles), "guild", Duration::from_secs(1));
    let policy = AuthorizationPolicy::new(store.clone(), gateway, ORGS);
    let service = AchievementService::new(store.clone(), notifier.clone(), policy.clone(), "achievement::");
    Fixture { store, policy, notifier, service, org, member }
}

fn fixture() -> Fixture {
    fixture_with(RecordingNotifier::default(), StaticRoles::default().with_member("org", &[ORGS]).with_member("member", &[]))
}

async fn create(f: &Fixture, code: &str) -> Result<tripgate::achievements::Achievement> {
    let proof = f.policy.require_organizer(&f.org).await?;
    Ok(f.service
        .create(&proof, CreateAchievement { name: format!("Badge {}", code), image: String::new(), code: code.into() })
        .await?)
}

fn grant(code: &str, user_id: Option<u64>) -> GrantAchievement {
    GrantAchievement { code: code.into(), user_id }
}

#[tokio::test]
async fn create_provisions_prefixed_role() -> Result<()> {
    let f = fixture();
    let a = create(&f, "summit").await?;
    assert_eq!(a.external_role_id, "role-1");
    assert_eq!(f.notifier.created_roles.lock().clone(), vec!["achievement::Badge summit".to_string()]);
    Ok(())
}

#[tokio::test]
async fn duplicate_code_conflicts_before_role_creation() -> Result<()> {
    let f = fixture();
    create(&f, "summit").await?;
    let err = create(&f, "summit").await.unwrap_err();
    let app = err.downcast_ref::<tripgate::error::AppError>().expect("app error");
    assert!(app.is_conflict());
    assert_eq!(f.notifier.created_roles.lock().len(), 1);
    Ok(())
}

#[tokio::test]
async fn blank_name_or_code_is_bad_request() -> Result<()> {
    let f = fixture();
    let proof = f.policy.require_organizer(&f.org).await?;
    let err = f
        .service
        .create(&proof, CreateAchievement { name: " ".into(), image: String::new(), code: "x".into() })
        .await
        .unwrap_err();
    assert!(err.is_bad_request());
    Ok(())
}

#[tokio::test]
async fn second_grant_conflicts_without_second_external_grant() -> Result<()> {
    let f = fixture();
    create(&f, "summit").await?;

    f.service.grant(&f.member, grant("summit", None)).await?;
    let err = f.service.grant(&f.member, grant("summit", None)).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(f.notifier.role_grants.lock().len(), 1);
    assert_eq!(f.notifier.achievements.load(Ordering::SeqCst), 1);

    // an organizer granting the same pair hits the same guard
    let err = f.service.grant(&f.org, grant("summit", Some(f.member.id))).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(f.notifier.role_grants.lock().len(), 1);
    Ok(())
}

#[tokio::test]
async fn granting_to_someone_else_requires_organizer() -> Result<()> {
    let f = fixture();
    create(&f, "summit").await?;

    let err = f.service.grant(&f.member, grant("summit", Some(f.org.id))).await.unwrap_err();
    assert!(err.is_forbidden());
    assert!(f.notifier.role_grants.lock().is_empty());

    let out = f.service.grant(&f.org, grant("summit", Some(f.member.id))).await?;
    assert_eq!(out.target, f.member.id);
    assert_eq!(f.notifier.role_grants.lock()[0], ("member".to_string(), "role-1".to_string()));
    assert_eq!(f.service.list_for(f.member.id).len(), 1);
    assert!(f.service.list_for(f.org.id).is_empty());
    Ok(())
}

#[tokio::test]
async fn self_grant_needs_no_role() -> Result<()> {
    let f = fixture();
    create(&f, "summit").await?;
    let out = f.service.grant(&f.member, grant("summit", Some(f.member.id))).await?;
    assert_eq!(out.target, f.member.id);
    Ok(())
}

#[tokio::test]
async fn unknown_code_or_target_is_not_found() -> Result<()> {
    let f = fixture();
    create(&f, "summit").await?;
    assert!(f.service.grant(&f.member, grant("nope", None)).await.unwrap_err().is_not_found());
    assert!(f.service.grant(&f.org, grant("summit", Some(9_999))).await.unwrap_err().is_not_found());
    assert!(f.notifier.role_grants.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_external_grant_records_nothing() -> Result<()> {
    let f = fixture();
    create(&f, "summit").await?;
    let failing = AchievementService::new(
        f.store.clone(),
        Arc::new(RecordingNotifier { fail_roles: true, ..Default::default() }),
        f.policy.clone(),
        "achievement::",
    );
    let err = failing.grant(&f.member, grant("summit", None)).await.unwrap_err();
    assert!(err.is_external());
    assert!(failing.list_for(f.member.id).is_empty());

    // the pair is still grantable once the external side recovers
    f.service.grant(&f.member, grant("summit", None)).await?;
    Ok(())
}

#[tokio::test]
async fn role_authority_outage_fails_closed() -> Result<()> {
    let f = fixture_with(RecordingNotifier::default(), StaticRoles { fail: true, ..Default::default() });
    let err = f.policy.require_organizer(&f.org).await.unwrap_err();
    assert!(err.is_external());

    // self-grants never consult the role authority
    let store = f.store.clone();
    store.transaction(|t| {
        t.insert_achievement(tripgate::achievements::Achievement {
            id: 0,
            name: "Seeded".into(),
            image: String::new(),
            code: "seed".into(),
            external_role_id: "r".into(),
            created_at: chrono::Utc::now(),
        })
    })?;
    assert!(f.service.grant(&f.org, grant("seed", Some(f.member.id))).await.unwrap_err().is_external());
    f.service.grant(&f.member, grant("seed", None)).await?;
    Ok(())
}
