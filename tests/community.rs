#![cfg(feature = "inmem-store")]

use acadwell::models::{NewUser, PostFilter, Role, BADGE_ACCEPTED_ANSWER};
use acadwell::repo::inmem::InMemRepo;
use acadwell::repo::{BadgeRepo, BoardRepo, LedgerRepo, RepoError, UserRepo};

fn repo() -> InMemRepo {
    std::env::set_var("ACADWELL_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

async fn add_user(r: &InMemRepo, id: &str) {
    r.create_user(NewUser {
        id: id.into(),
        role: Role::Student,
        email: format!("{id}@uni.edu"),
        credential_hash: "hash".into(),
        name: id.to_uppercase(),
        university: None,
        department: None,
        anon_id: format!("anon-{id}"),
        reg_number: None,
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn question_validation_and_attribution() {
    let r = repo();
    add_user(&r, "s1").await;

    let err = r.create_question("s1", "   ", true).await.unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));

    let anon = r.create_question("s1", "Why is the sky blue?", true).await.unwrap();
    assert_eq!(anon.posted_by, "anon-s1");
    assert_eq!(anon.likes, 0);
    assert!(anon.answers.is_empty());
    assert!(anon.accepted_answer_id.is_none());

    let named = r.create_question("s1", "Open question", false).await.unwrap();
    assert_eq!(named.posted_by, "S1");
}

#[tokio::test]
async fn accept_answer_awards_credits_and_badge() {
    let r = repo();
    add_user(&r, "s1").await;
    add_user(&r, "s2").await;

    let post = r.create_question("s1", "What is recursion?", false).await.unwrap();
    let answer = r
        .answer_question(&post.id, "s2", "A function calling itself", false)
        .await
        .unwrap();
    assert!(!answer.accepted);

    let badge = r.accept_answer(&post.id, &answer.id, "s1", 15).await.unwrap();
    assert_eq!(badge.user_id, "s2");
    assert_eq!(badge.points, 15);
    assert_eq!(badge.kind, BADGE_ACCEPTED_ANSWER);
    assert_eq!(badge.post_id, post.id);
    assert_eq!(badge.answer_id, answer.id);

    // credits moved exactly once, post carries the accepted marker
    assert_eq!(r.find_by_id("s2").await.unwrap().credits, 15);
    let post = r.get_post(&post.id).await.unwrap();
    assert_eq!(post.accepted_answer_id.as_deref(), Some(answer.id.as_str()));
    assert!(post.answers[0].accepted);

    let badges = r.list_badges("s2").await.unwrap();
    assert_eq!(badges.len(), 1);
}

#[tokio::test]
async fn accept_answer_guards() {
    let r = repo();
    add_user(&r, "s1").await;
    add_user(&r, "s2").await;
    add_user(&r, "s3").await;

    let post = r.create_question("s1", "Q", false).await.unwrap();
    let a1 = r.answer_question(&post.id, "s2", "first", false).await.unwrap();
    let a2 = r.answer_question(&post.id, "s3", "second", false).await.unwrap();

    // only the question owner may accept
    let err = r.accept_answer(&post.id, &a1.id, "s2", 10).await.unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));

    // credits must be positive
    let err = r.accept_answer(&post.id, &a1.id, "s1", 0).await.unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
    let err = r.accept_answer(&post.id, &a1.id, "s1", -5).await.unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));

    // unknown answer id
    let err = r.accept_answer(&post.id, "nope", "s1", 10).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));

    r.accept_answer(&post.id, &a1.id, "s1", 10).await.unwrap();

    // a second accept fails regardless of which answer is targeted
    let err = r.accept_answer(&post.id, &a2.id, "s1", 10).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));
    let err = r.accept_answer(&post.id, &a1.id, "s1", 10).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));

    // no credit leaked to the second answerer
    assert_eq!(r.find_by_id("s3").await.unwrap().credits, 0);
}

#[tokio::test]
async fn concurrent_accepts_credit_once() {
    let r = repo();
    add_user(&r, "s1").await;
    add_user(&r, "s2").await;
    let post = r.create_question("s1", "Q", false).await.unwrap();
    let ans = r.answer_question(&post.id, "s2", "A", false).await.unwrap();

    let (first, second) = tokio::join!(
        r.accept_answer(&post.id, &ans.id, "s1", 10),
        r.accept_answer(&post.id, &ans.id, "s1", 10)
    );
    assert_eq!([&first, &second].iter().filter(|res| res.is_ok()).count(), 1);
    assert_eq!(r.find_by_id("s2").await.unwrap().credits, 10);
    assert_eq!(r.list_badges("s2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn award_is_idempotent_per_answer() {
    let r = repo();
    add_user(&r, "s2").await;

    let first = r.award("s2", 15, "post-1", "answer-1").await.unwrap();
    let second = r.award("s2", 15, "post-1", "answer-1").await.unwrap();
    assert_eq!(first.id, second.id);

    assert_eq!(r.find_by_id("s2").await.unwrap().credits, 15);
    assert_eq!(r.list_badges("s2").await.unwrap().len(), 1);

    // a different answer is a separate award
    r.award("s2", 5, "post-1", "answer-2").await.unwrap();
    assert_eq!(r.find_by_id("s2").await.unwrap().credits, 20);
}

#[tokio::test]
async fn award_rejects_non_positive_points() {
    let r = repo();
    add_user(&r, "s2").await;
    let err = r.award("s2", 0, "p", "a").await.unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
    let err = r.award("s2", -1, "p", "a").await.unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
    assert_eq!(r.find_by_id("s2").await.unwrap().credits, 0);
}

#[tokio::test]
async fn concurrent_likes_all_count() {
    let r = repo();
    add_user(&r, "s1").await;
    let post = r.create_question("s1", "Q", false).await.unwrap();

    let (a, b, c) = tokio::join!(r.like_post(&post.id), r.like_post(&post.id), r.like_post(&post.id));
    a.unwrap();
    b.unwrap();
    c.unwrap();
    assert_eq!(r.get_post(&post.id).await.unwrap().likes, 3);
}

#[tokio::test]
async fn like_unknown_post() {
    let r = repo();
    add_user(&r, "s1").await;
    let err = r.like_post("nope").await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn list_posts_filters() {
    let r = repo();
    add_user(&r, "a").await;
    add_user(&r, "b").await;
    add_user(&r, "c").await;

    let mine = r.create_question("a", "by a", false).await.unwrap();
    let by_b = r.create_question("b", "by b", false).await.unwrap();
    r.create_question("c", "by c", false).await.unwrap();
    // a answers b's post, so it shows under "mine" for a
    r.answer_question(&by_b.id, "a", "an answer", false).await.unwrap();

    let recent = r.list_posts("a", PostFilter::Recent).await.unwrap();
    assert_eq!(recent.len(), 3);
    // newest first
    assert!(recent.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    let mine_view = r.list_posts("a", PostFilter::Mine).await.unwrap();
    let ids: Vec<_> = mine_view.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(mine_view.len(), 2);
    assert!(ids.contains(&mine.id.as_str()));
    assert!(ids.contains(&by_b.id.as_str()));

    // no connections: empty result, not a "recent" fallback
    assert!(r.list_posts("a", PostFilter::Connections).await.unwrap().is_empty());

    // after connecting with b, only b's posts show
    r.send_request("a", "b").await.unwrap();
    r.accept_request("a", "b").await.unwrap();
    let conn_view = r.list_posts("a", PostFilter::Connections).await.unwrap();
    assert_eq!(conn_view.len(), 1);
    assert_eq!(conn_view[0].id, by_b.id);
}
