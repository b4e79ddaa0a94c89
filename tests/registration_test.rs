mod common;

use common::{TestBackends, read_json};
use serde_json::json;
use token_gate::handlers::registration::UserId;
use token_gate::utils::address::EvmAddress;

const FIRST: &str = "0x3333333333333333333333333333333333333333";
const SECOND: &str = "0x4444444444444444444444444444444444444444";

#[tokio::test]
async fn test_registration_is_persisted_in_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let backends = TestBackends::start().await;
    let state = backends.state(dir.path(), &[]).await;

    state.dialogue.handle(UserId(5), "/start").await;
    state.dialogue.handle(UserId(5), FIRST).await;
    state.dialogue.handle(UserId(5), "/start").await;
    state.dialogue.handle(UserId(5), SECOND).await;
    let reply = state.dialogue.handle(UserId(5), "yes").await;
    assert!(reply.contains(SECOND));

    let book = read_json(&dir.path().join("user_addresses.json"));
    assert_eq!(
        book,
        json!({
            "user_addresses": {"5": SECOND},
            "address_to_user": {SECOND: 5}
        })
    );

    // A fresh process sees the same bindings
    let reloaded = backends.state(dir.path(), &[]).await;
    assert_eq!(
        reloaded.registry.user_of(&EvmAddress::parse(SECOND).unwrap()).await,
        Some(UserId(5))
    );
    assert_eq!(
        reloaded.registry.user_of(&EvmAddress::parse(FIRST).unwrap()).await,
        None
    );
}

#[tokio::test]
async fn test_corrupt_state_files_fall_back_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("user_addresses.json"), "{not json").unwrap();
    std::fs::write(dir.path().join("user_statuses.json"), "").unwrap();

    let backends = TestBackends::start().await;
    let state = backends.state(dir.path(), &[]).await;

    assert!(state.registry.is_empty().await);
    assert!(state.tracker.snapshot().await.is_empty());
}
