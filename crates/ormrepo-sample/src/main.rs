//! # ormrepo demo
//!
//! Runs a short blog session against the in-memory store:
//! 1. Registers a user together with their first post, atomically.
//! 2. Publishes and tags the post.
//! 3. Comments on it and reads the thread back.
//! 4. Shows a validation failure and a uniqueness conflict.
//! 5. Archives the post and cleans up.
//!
//! ```bash
//! RUST_LOG=info cargo run --bin ormrepo-demo
//! ```

use ormrepo::logging::setup_tracing;
use ormrepo::RepositoryClient;
use ormrepo_sample::lifecycle::BlogSystem;
use ormrepo_sample::model::{CommentDto, PostDto, UserDto};
use tracing::{error, info, warn, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();
    info!("Starting blog demo");

    let system = BlogSystem::new().map_err(|e| e.to_string())?;
    let users = &system.user_service;
    let posts = &system.post_service;

    let span = tracing::info_span!("registration");
    let (alice, first_post) = async {
        users
            .register_with_first_post(
                UserDto::new("Alice", "alice@example.com", 34),
                "Hello, world",
                "My first post.",
            )
            .await
            .map_err(|e| e.to_string())
    }
    .instrument(span)
    .await?;
    let alice_id = alice.id.ok_or("registered user has no id")?;
    let post_id = first_post.id.ok_or("stored post has no id")?;
    info!(user_id = alice_id, post_id, "Registered");

    let span = tracing::info_span!("publishing");
    async {
        posts.publish(post_id).await?;
        posts.tag(post_id, vec!["intro".into(), "rust".into()]).await?;
        posts
            .write(PostDto::draft(alice_id, "Second thoughts", "Still drafting."))
            .await
    }
    .instrument(span)
    .await
    .map_err(|e| e.to_string())?;

    let span = tracing::info_span!("comments");
    let thread = async {
        posts
            .comment(post_id, CommentDto::new("Bob", "Welcome aboard!"))
            .await?;
        posts.thread(post_id).await
    }
    .instrument(span)
    .await
    .map_err(|e| e.to_string())?;
    info!(comments = thread.comments.map_or(0, |c| c.len()), "Thread loaded");

    match users.register(UserDto::new("B", "not-an-email", 7)).await {
        Ok(user) => warn!(?user, "Invalid user was accepted"),
        Err(e) => info!(error = %e, "Invalid user rejected"),
    }
    match users.register(UserDto::new("Alice Again", "alice@example.com", 30)).await {
        Ok(user) => warn!(?user, "Duplicate email was accepted"),
        Err(e) => info!(error = %e, "Duplicate email rejected"),
    }

    let by_alice = posts.by_author(alice_id, 0, 10).await.map_err(|e| e.to_string())?;
    info!(count = by_alice.len(), "Posts by Alice");

    if let Err(e) = posts.archive(post_id).await {
        error!(error = %e, "Archiving failed");
    }
    let visible = posts.by_author(alice_id, 0, 10).await.map_err(|e| e.to_string())?;
    let archived = posts.count_archived().await.map_err(|e| e.to_string())?;
    info!(visible = visible.len(), archived, "After archiving");

    users.delete(alice_id).await.map_err(|e| e.to_string())?;
    info!(
        users = system.database().row_count("users"),
        posts = system.database().row_count("posts"),
        comments = system.database().row_count("comments"),
        "Demo completed"
    );
    Ok(())
}
