use chrono::Utc;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("{0}")] Validation(&'static str),
    #[error("not found")] NotFound,
    #[error("{0}")] Conflict(&'static str),
    #[error("not authorized")] Forbidden,
    #[error("datastore unavailable: {0}")] Unavailable(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

/// Directory of identity records. Registration/login live in the external
/// auth service; `create_user` only provisions the directory record for an
/// already-verified subject.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn find_by_id(&self, id: &str) -> RepoResult<User>;
    async fn find_by_email(&self, email: &str) -> RepoResult<User>;
    /// Additive-only; `delta` must be positive.
    async fn increment_credits(&self, id: &str, delta: i64) -> RepoResult<()>;
    /// Applies profile fields. `id`, `role`, `credential_hash`, `credits`
    /// and `email` are immutable through this path.
    async fn update_profile(
        &self,
        id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> RepoResult<User>;
    async fn list_users(&self) -> RepoResult<Vec<User>>;
}

/// Follow-request lifecycle and connection queries.
///
/// Per (from, to) pair the state machine is NONE -> PENDING -> {ACCEPTED,
/// REJECTED}; the terminal states are never reused, a later `send_request`
/// starts a fresh PENDING record.
#[async_trait]
pub trait LedgerRepo: Send + Sync {
    async fn send_request(&self, from: &str, to: &str) -> RepoResult<FollowRequest>;
    /// Compare-and-delete: the pending request (from=follower, to=accepter)
    /// is removed and a Connection created in one atomic step. A retried
    /// accept sees `NotFound`, never a second Connection.
    async fn accept_request(&self, follower: &str, accepter: &str) -> RepoResult<Connection>;
    async fn reject_request(&self, request_id: &str, by_user: &str) -> RepoResult<()>;
    async fn list_connections(&self, user: &str) -> RepoResult<Vec<User>>;
    async fn list_pending(&self, user: &str) -> RepoResult<Vec<User>>;
    async fn suggest(&self, user: &str) -> RepoResult<Vec<User>>;
}

/// Community Q&A storage and the one-accepted-answer invariant.
#[async_trait]
pub trait BoardRepo: Send + Sync {
    async fn create_question(&self, user_id: &str, text: &str, is_anonymous: bool) -> RepoResult<Post>;
    async fn answer_question(
        &self,
        post_id: &str,
        user_id: &str,
        text: &str,
        is_anonymous: bool,
    ) -> RepoResult<Answer>;
    /// Guarded transition: only succeeds while `accepted_answer_id` is
    /// unset, then awards `credits` to the answer's author. `credits` must
    /// be positive (callers default it to 10).
    async fn accept_answer(
        &self,
        post_id: &str,
        answer_id: &str,
        by_user: &str,
        credits: i64,
    ) -> RepoResult<Badge>;
    /// Unconditional atomic increment; repeat likes by the same caller are
    /// allowed. Returns the new count.
    async fn like_post(&self, post_id: &str) -> RepoResult<i64>;
    async fn get_post(&self, post_id: &str) -> RepoResult<Post>;
    async fn list_posts(&self, user_id: &str, filter: PostFilter) -> RepoResult<Vec<Post>>;
}

/// Converts an accepted answer into a durable credit increment plus an
/// audit badge. At most once per (post_id, answer_id): a duplicate award is
/// a no-op returning the existing badge.
#[async_trait]
pub trait BadgeRepo: Send + Sync {
    async fn award(
        &self,
        recipient: &str,
        points: i64,
        post_id: &str,
        answer_id: &str,
    ) -> RepoResult<Badge>;
    async fn list_badges(&self, user_id: &str) -> RepoResult<Vec<Badge>>;
}

/// Direct messages between connected users.
#[async_trait]
pub trait ChatRepo: Send + Sync {
    async fn send_message(&self, sender: &str, receiver: &str, text: &str) -> RepoResult<Message>;
    async fn history(&self, user: &str, partner: &str) -> RepoResult<Vec<Message>>;
    /// Timestamps of messages sent by `user`, for the wellness summary.
    async fn sent_message_times(&self, user: &str) -> RepoResult<Vec<chrono::DateTime<Utc>>>;
}

#[async_trait]
pub trait GroupRepo: Send + Sync {
    async fn create_group(&self, creator: &str, new: NewGroup) -> RepoResult<Group>;
    async fn my_groups(&self, user: &str) -> RepoResult<Vec<Group>>;
    async fn suggest_groups(&self, user: &str) -> RepoResult<Vec<Group>>;
    async fn join_group(&self, group_id: &str, user: &str) -> RepoResult<()>;
    async fn leave_group(&self, group_id: &str, user: &str) -> RepoResult<()>;
    async fn get_group(&self, group_id: &str) -> RepoResult<Group>;
    async fn group_messages(&self, group_id: &str) -> RepoResult<Vec<GroupMessage>>;
    async fn send_group_message(&self, group_id: &str, sender: &str, text: &str) -> RepoResult<GroupMessage>;
    /// (total groups, groups joined by `user`, group messages sent by
    /// `user`) for the correlation report.
    async fn group_counts(&self, user: &str) -> RepoResult<(i64, i64, i64)>;
}

#[async_trait]
pub trait WellnessRepo: Send + Sync {
    async fn save_mood(&self, user: &str, mood: &str) -> RepoResult<MoodEntry>;
    async fn mood_history(&self, user: &str, limit: usize) -> RepoResult<Vec<MoodEntry>>;
}

#[async_trait]
pub trait GradeRepo: Send + Sync {
    async fn insert_grades(&self, rows: Vec<Grade>) -> RepoResult<usize>;
    async fn grades_for(&self, reg_number: &str) -> RepoResult<Vec<Grade>>;
}

pub trait Repo:
    UserRepo + LedgerRepo + BoardRepo + BadgeRepo + ChatRepo + GroupRepo + WellnessRepo + GradeRepo
{
}

impl<T> Repo for T where
    T: UserRepo + LedgerRepo + BoardRepo + BadgeRepo + ChatRepo + GroupRepo + WellnessRepo + GradeRepo
{
}

/// Profile fields the directory refuses to touch via `update_profile`.
pub const IMMUTABLE_PROFILE_FIELDS: &[&str] =
    &["id", "role", "credential_hash", "credits", "email"];

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        requests: HashMap<Id, FollowRequest>,
        connections: HashMap<Id, Connection>,
        posts: HashMap<Id, Post>,
        badges: HashMap<Id, Badge>,
        messages: Vec<Message>,
        groups: HashMap<Id, Group>,
        group_messages: Vec<GroupMessage>,
        moods: Vec<MoodEntry>,
        grades: Vec<Grade>,
    }

    impl State {
        fn pending_between(&self, a: &str, b: &str) -> bool {
            self.requests.values().any(|r| {
                r.status == RequestStatus::Pending
                    && ((r.from == a && r.to == b) || (r.from == b && r.to == a))
            })
        }

        fn connected(&self, a: &str, b: &str) -> bool {
            let (lo, hi) = Connection::pair(a, b);
            self.connections.values().any(|c| c.user1 == lo && c.user2 == hi)
        }

        fn peers_of(&self, user: &str) -> Vec<Id> {
            self.connections
                .values()
                .filter_map(|c| c.peer_of(user).map(str::to_string))
                .collect()
        }

        fn anon_of(&self, user: &str) -> Option<String> {
            self.users.get(user).map(|u| u.anon_id.clone())
        }

        /// Shared award path: used directly and from `accept_answer`, under
        /// the same write lock so badge append and credit increment commit
        /// together. Duplicate (post_id, answer_id) is a no-op.
        fn award(
            &mut self,
            recipient: &str,
            points: i64,
            post_id: &str,
            answer_id: &str,
        ) -> RepoResult<Badge> {
            if points <= 0 {
                return Err(RepoError::Validation("points must be positive"));
            }
            if let Some(existing) = self
                .badges
                .values()
                .find(|b| b.post_id == post_id && b.answer_id == answer_id)
            {
                return Ok(existing.clone());
            }
            let user = self.users.get_mut(recipient).ok_or(RepoError::NotFound)?;
            user.credits += points;
            let badge = Badge {
                id: new_id(),
                user_id: recipient.to_string(),
                kind: BADGE_ACCEPTED_ANSWER.to_string(),
                points,
                post_id: post_id.to_string(),
                answer_id: answer_id.to_string(),
                created_at: Utc::now(),
            };
            self.badges.insert(badge.id.clone(), badge.clone());
            Ok(badge)
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("ACADWELL_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("state.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!(
                            "failed to parse snapshot '{}': {e}. Starting empty.",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    log::error!("failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if s.users.contains_key(&new.id) {
                return Err(RepoError::Conflict("user already exists"));
            }
            if s.users.values().any(|u| u.email == new.email) {
                return Err(RepoError::Conflict("email already registered"));
            }
            let user = User {
                id: new.id,
                role: new.role,
                email: new.email,
                credential_hash: new.credential_hash,
                credits: 0,
                name: new.name,
                university: new.university,
                department: new.department,
                anon_id: new.anon_id,
                reg_number: new.reg_number,
                created_at: Utc::now(),
            };
            s.users.insert(user.id.clone(), user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn find_by_id(&self, id: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users.get(id).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_by_email(&self, email: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users
                .values()
                .find(|u| u.email == email)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn increment_credits(&self, id: &str, delta: i64) -> RepoResult<()> {
            if delta <= 0 {
                return Err(RepoError::Validation("credit delta must be positive"));
            }
            let mut s = self.state.write().unwrap();
            let user = s.users.get_mut(id).ok_or(RepoError::NotFound)?;
            user.credits += delta;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn update_profile(
            &self,
            id: &str,
            fields: &serde_json::Map<String, serde_json::Value>,
        ) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            let user = s.users.get_mut(id).ok_or(RepoError::NotFound)?;

            let as_str = |v: &serde_json::Value| v.as_str().map(str::to_string);
            let mut applied = 0usize;
            for (key, value) in fields {
                if IMMUTABLE_PROFILE_FIELDS.contains(&key.as_str()) {
                    continue;
                }
                match key.as_str() {
                    "name" => {
                        if let Some(v) = as_str(value) {
                            user.name = v;
                            applied += 1;
                        }
                    }
                    "university" => {
                        user.university = as_str(value);
                        applied += 1;
                    }
                    "department" => {
                        user.department = as_str(value);
                        applied += 1;
                    }
                    "anon_id" => {
                        if let Some(v) = as_str(value) {
                            user.anon_id = v;
                            applied += 1;
                        }
                    }
                    "reg_number" => {
                        user.reg_number = as_str(value);
                        applied += 1;
                    }
                    _ => {}
                }
            }
            if applied == 0 {
                return Err(RepoError::Validation("no valid fields to update"));
            }
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.users.values().cloned().collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(v)
        }
    }

    #[async_trait]
    impl LedgerRepo for InMemRepo {
        async fn send_request(&self, from: &str, to: &str) -> RepoResult<FollowRequest> {
            if from == to {
                return Err(RepoError::Validation("cannot follow yourself"));
            }
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(from) || !s.users.contains_key(to) {
                return Err(RepoError::NotFound);
            }
            // Canonical duplicate rule, shared by every entry point.
            if s.pending_between(from, to) {
                return Err(RepoError::Conflict("request already pending"));
            }
            if s.connected(from, to) {
                return Err(RepoError::Conflict("already connected"));
            }
            let req = FollowRequest {
                id: new_id(),
                from: from.to_string(),
                to: to.to_string(),
                status: RequestStatus::Pending,
                created_at: Utc::now(),
            };
            s.requests.insert(req.id.clone(), req.clone());
            drop(s);
            self.persist();
            Ok(req)
        }

        async fn accept_request(&self, follower: &str, accepter: &str) -> RepoResult<Connection> {
            let mut s = self.state.write().unwrap();
            // Compare-and-delete under the write lock: a racing duplicate
            // accept finds no pending request and gets NotFound.
            let req_id = s
                .requests
                .values()
                .find(|r| {
                    r.from == follower && r.to == accepter && r.status == RequestStatus::Pending
                })
                .map(|r| r.id.clone())
                .ok_or(RepoError::NotFound)?;
            s.requests.remove(&req_id);

            if s.connected(follower, accepter) {
                // Stale request against an existing connection; the request
                // is consumed but no second Connection appears.
                drop(s);
                self.persist();
                return Err(RepoError::Conflict("already connected"));
            }
            let (user1, user2) = Connection::pair(follower, accepter);
            let conn = Connection { id: new_id(), user1, user2, created_at: Utc::now() };
            s.connections.insert(conn.id.clone(), conn.clone());
            drop(s);
            self.persist();
            Ok(conn)
        }

        async fn reject_request(&self, request_id: &str, by_user: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let req = s.requests.get_mut(request_id).ok_or(RepoError::NotFound)?;
            if req.status != RequestStatus::Pending {
                return Err(RepoError::NotFound);
            }
            if req.to != by_user {
                return Err(RepoError::Forbidden);
            }
            req.status = RequestStatus::Rejected; // terminal, kept for audit
            drop(s);
            self.persist();
            Ok(())
        }

        async fn list_connections(&self, user: &str) -> RepoResult<Vec<User>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<User> = s
                .peers_of(user)
                .iter()
                .filter_map(|id| s.users.get(id).cloned())
                .collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(v)
        }

        async fn list_pending(&self, user: &str) -> RepoResult<Vec<User>> {
            let s = self.state.read().unwrap();
            let mut pending: Vec<&FollowRequest> = s
                .requests
                .values()
                .filter(|r| r.to == user && r.status == RequestStatus::Pending)
                .collect();
            pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(pending
                .iter()
                .filter_map(|r| s.users.get(&r.from).cloned())
                .collect())
        }

        async fn suggest(&self, user: &str) -> RepoResult<Vec<User>> {
            let s = self.state.read().unwrap();
            if !s.users.contains_key(user) {
                return Err(RepoError::NotFound);
            }
            let mut v: Vec<User> = s
                .users
                .values()
                .filter(|u| {
                    u.id != user && !s.connected(user, &u.id) && !s.pending_between(user, &u.id)
                })
                .cloned()
                .collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(v)
        }
    }

    #[async_trait]
    impl BoardRepo for InMemRepo {
        async fn create_question(
            &self,
            user_id: &str,
            text: &str,
            is_anonymous: bool,
        ) -> RepoResult<Post> {
            if text.trim().is_empty() {
                return Err(RepoError::Validation("question is required"));
            }
            let mut s = self.state.write().unwrap();
            let user = s.users.get(user_id).ok_or(RepoError::NotFound)?;
            let posted_by = if is_anonymous { user.anon_id.clone() } else { user.name.clone() };
            let post = Post {
                id: new_id(),
                question: text.to_string(),
                posted_by,
                user_id: user_id.to_string(),
                is_anonymous,
                likes: 0,
                answers: Vec::new(),
                accepted_answer_id: None,
                created_at: Utc::now(),
            };
            s.posts.insert(post.id.clone(), post.clone());
            drop(s);
            self.persist();
            Ok(post)
        }

        async fn answer_question(
            &self,
            post_id: &str,
            user_id: &str,
            text: &str,
            is_anonymous: bool,
        ) -> RepoResult<Answer> {
            if text.trim().is_empty() {
                return Err(RepoError::Validation("answer text is required"));
            }
            let mut s = self.state.write().unwrap();
            let user = s.users.get(user_id).ok_or(RepoError::NotFound)?;
            let posted_by = if is_anonymous { user.anon_id.clone() } else { user.name.clone() };
            let answer = Answer {
                id: new_id(),
                text: text.to_string(),
                posted_by,
                user_id: user_id.to_string(),
                is_anonymous,
                accepted: false,
                created_at: Utc::now(),
            };
            let post = s.posts.get_mut(post_id).ok_or(RepoError::NotFound)?;
            post.answers.push(answer.clone());
            drop(s);
            self.persist();
            Ok(answer)
        }

        async fn accept_answer(
            &self,
            post_id: &str,
            answer_id: &str,
            by_user: &str,
            credits: i64,
        ) -> RepoResult<Badge> {
            if credits <= 0 {
                return Err(RepoError::Validation("credits must be positive"));
            }
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(post_id).ok_or(RepoError::NotFound)?;
            if post.user_id != by_user {
                return Err(RepoError::Forbidden);
            }
            // Conditional transition: checked and applied under one write
            // lock, so two racing accepts cannot both pass this guard.
            if post.accepted_answer_id.is_some() {
                return Err(RepoError::Conflict("an answer is already accepted"));
            }
            let answer = post
                .answers
                .iter_mut()
                .find(|a| a.id == answer_id)
                .ok_or(RepoError::NotFound)?;
            answer.accepted = true;
            let recipient = answer.user_id.clone();
            post.accepted_answer_id = Some(answer_id.to_string());

            let badge = s.award(&recipient, credits, post_id, answer_id)?;
            drop(s);
            self.persist();
            Ok(badge)
        }

        async fn like_post(&self, post_id: &str) -> RepoResult<i64> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(post_id).ok_or(RepoError::NotFound)?;
            post.likes += 1;
            let likes = post.likes;
            drop(s);
            self.persist();
            Ok(likes)
        }

        async fn get_post(&self, post_id: &str) -> RepoResult<Post> {
            let s = self.state.read().unwrap();
            s.posts.get(post_id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_posts(&self, user_id: &str, filter: PostFilter) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            if !s.users.contains_key(user_id) {
                return Err(RepoError::NotFound);
            }
            let mut v: Vec<Post> = match filter {
                PostFilter::Recent => s.posts.values().cloned().collect(),
                PostFilter::Mine => s
                    .posts
                    .values()
                    .filter(|p| {
                        p.user_id == user_id || p.answers.iter().any(|a| a.user_id == user_id)
                    })
                    .cloned()
                    .collect(),
                PostFilter::Connections => {
                    // No connections means no posts, not a "recent" fallback.
                    let peers = s.peers_of(user_id);
                    s.posts
                        .values()
                        .filter(|p| peers.iter().any(|peer| *peer == p.user_id))
                        .cloned()
                        .collect()
                }
            };
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }
    }

    #[async_trait]
    impl BadgeRepo for InMemRepo {
        async fn award(
            &self,
            recipient: &str,
            points: i64,
            post_id: &str,
            answer_id: &str,
        ) -> RepoResult<Badge> {
            let mut s = self.state.write().unwrap();
            let badge = s.award(recipient, points, post_id, answer_id)?;
            drop(s);
            self.persist();
            Ok(badge)
        }

        async fn list_badges(&self, user_id: &str) -> RepoResult<Vec<Badge>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Badge> =
                s.badges.values().filter(|b| b.user_id == user_id).cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }
    }

    #[async_trait]
    impl ChatRepo for InMemRepo {
        async fn send_message(&self, sender: &str, receiver: &str, text: &str) -> RepoResult<Message> {
            if text.trim().is_empty() {
                return Err(RepoError::Validation("message text required"));
            }
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(receiver) {
                return Err(RepoError::NotFound);
            }
            if !s.connected(sender, receiver) {
                return Err(RepoError::Forbidden);
            }
            let msg = Message {
                id: new_id(),
                sender_id: sender.to_string(),
                receiver_id: receiver.to_string(),
                text: text.to_string(),
                created_at: Utc::now(),
            };
            s.messages.push(msg.clone());
            drop(s);
            self.persist();
            Ok(msg)
        }

        async fn history(&self, user: &str, partner: &str) -> RepoResult<Vec<Message>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Message> = s
                .messages
                .iter()
                .filter(|m| {
                    (m.sender_id == user && m.receiver_id == partner)
                        || (m.sender_id == partner && m.receiver_id == user)
                })
                .cloned()
                .collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(v)
        }

        async fn sent_message_times(&self, user: &str) -> RepoResult<Vec<chrono::DateTime<Utc>>> {
            let s = self.state.read().unwrap();
            Ok(s.messages
                .iter()
                .filter(|m| m.sender_id == user)
                .map(|m| m.created_at)
                .collect())
        }
    }

    #[async_trait]
    impl GroupRepo for InMemRepo {
        async fn create_group(&self, creator: &str, new: NewGroup) -> RepoResult<Group> {
            if new.name.trim().is_empty() {
                return Err(RepoError::Validation("group name is required"));
            }
            let mut s = self.state.write().unwrap();
            let anon = s.anon_of(creator).ok_or(RepoError::NotFound)?;
            let group = Group {
                id: new_id(),
                name: new.name,
                description: new.description,
                profile_pic: new.profile_pic,
                is_private: new.is_private,
                created_by: creator.to_string(),
                members: vec![creator.to_string()],
                created_at: Utc::now(),
            };
            s.groups.insert(group.id.clone(), group.clone());
            s.group_messages.push(GroupMessage {
                id: new_id(),
                group_id: group.id.clone(),
                sender_id: None,
                sender_anon_id: None,
                text: format!("{anon} created the group"),
                system: true,
                created_at: Utc::now(),
            });
            drop(s);
            self.persist();
            Ok(group)
        }

        async fn my_groups(&self, user: &str) -> RepoResult<Vec<Group>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Group> = s
                .groups
                .values()
                .filter(|g| g.members.iter().any(|m| m == user))
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }

        async fn suggest_groups(&self, user: &str) -> RepoResult<Vec<Group>> {
            let s = self.state.read().unwrap();
            let peers = s.peers_of(user);
            let mut v: Vec<Group> = s
                .groups
                .values()
                .filter(|g| !g.members.iter().any(|m| m == user))
                .filter(|g| {
                    // Public groups, or private ones created by a connection.
                    !g.is_private || peers.iter().any(|p| *p == g.created_by)
                })
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }

        async fn join_group(&self, group_id: &str, user: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let anon = s.anon_of(user).ok_or(RepoError::NotFound)?;
            let group = s.groups.get_mut(group_id).ok_or(RepoError::NotFound)?;
            if group.members.iter().any(|m| m == user) {
                return Err(RepoError::Conflict("already a member"));
            }
            group.members.push(user.to_string());
            s.group_messages.push(GroupMessage {
                id: new_id(),
                group_id: group_id.to_string(),
                sender_id: None,
                sender_anon_id: None,
                text: format!("{anon} joined the group"),
                system: true,
                created_at: Utc::now(),
            });
            drop(s);
            self.persist();
            Ok(())
        }

        async fn leave_group(&self, group_id: &str, user: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let anon = s.anon_of(user).ok_or(RepoError::NotFound)?;
            let group = s.groups.get_mut(group_id).ok_or(RepoError::NotFound)?;
            let before = group.members.len();
            group.members.retain(|m| m != user);
            if group.members.len() == before {
                return Err(RepoError::Validation("not a member of this group"));
            }
            s.group_messages.push(GroupMessage {
                id: new_id(),
                group_id: group_id.to_string(),
                sender_id: None,
                sender_anon_id: None,
                text: format!("{anon} left the group"),
                system: true,
                created_at: Utc::now(),
            });
            drop(s);
            self.persist();
            Ok(())
        }

        async fn get_group(&self, group_id: &str) -> RepoResult<Group> {
            let s = self.state.read().unwrap();
            s.groups.get(group_id).cloned().ok_or(RepoError::NotFound)
        }

        async fn group_messages(&self, group_id: &str) -> RepoResult<Vec<GroupMessage>> {
            let s = self.state.read().unwrap();
            if !s.groups.contains_key(group_id) {
                return Err(RepoError::NotFound);
            }
            let mut v: Vec<GroupMessage> = s
                .group_messages
                .iter()
                .filter(|m| m.group_id == group_id)
                .cloned()
                .map(|mut m| {
                    // Sender alias resolved at read time so profile updates
                    // are reflected, as in the source.
                    if let Some(sender) = m.sender_id.as_deref() {
                        m.sender_anon_id = s.anon_of(sender);
                    }
                    m
                })
                .collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(v)
        }

        async fn send_group_message(
            &self,
            group_id: &str,
            sender: &str,
            text: &str,
        ) -> RepoResult<GroupMessage> {
            if text.trim().is_empty() {
                return Err(RepoError::Validation("message cannot be empty"));
            }
            let mut s = self.state.write().unwrap();
            let anon = s.anon_of(sender).ok_or(RepoError::NotFound)?;
            let group = s.groups.get(group_id).ok_or(RepoError::NotFound)?;
            if !group.members.iter().any(|m| m == sender) {
                return Err(RepoError::Forbidden);
            }
            let msg = GroupMessage {
                id: new_id(),
                group_id: group_id.to_string(),
                sender_id: Some(sender.to_string()),
                sender_anon_id: Some(anon),
                text: text.to_string(),
                system: false,
                created_at: Utc::now(),
            };
            s.group_messages.push(msg.clone());
            drop(s);
            self.persist();
            Ok(msg)
        }

        async fn group_counts(&self, user: &str) -> RepoResult<(i64, i64, i64)> {
            let s = self.state.read().unwrap();
            let total = s.groups.len() as i64;
            let joined =
                s.groups.values().filter(|g| g.members.iter().any(|m| m == user)).count() as i64;
            let sent = s
                .group_messages
                .iter()
                .filter(|m| m.sender_id.as_deref() == Some(user))
                .count() as i64;
            Ok((total, joined, sent))
        }
    }

    #[async_trait]
    impl WellnessRepo for InMemRepo {
        async fn save_mood(&self, user: &str, mood: &str) -> RepoResult<MoodEntry> {
            if mood.trim().is_empty() {
                return Err(RepoError::Validation("mood is required"));
            }
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(user) {
                return Err(RepoError::NotFound);
            }
            let entry = MoodEntry {
                id: new_id(),
                user_id: user.to_string(),
                mood: mood.to_string(),
                created_at: Utc::now(),
            };
            s.moods.push(entry.clone());
            drop(s);
            self.persist();
            Ok(entry)
        }

        async fn mood_history(&self, user: &str, limit: usize) -> RepoResult<Vec<MoodEntry>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<MoodEntry> =
                s.moods.iter().filter(|m| m.user_id == user).cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            v.truncate(limit);
            Ok(v)
        }
    }

    #[async_trait]
    impl GradeRepo for InMemRepo {
        async fn insert_grades(&self, rows: Vec<Grade>) -> RepoResult<usize> {
            let mut s = self.state.write().unwrap();
            let n = rows.len();
            s.grades.extend(rows);
            drop(s);
            self.persist();
            Ok(n)
        }

        async fn grades_for(&self, reg_number: &str) -> RepoResult<Vec<Grade>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Grade> =
                s.grades.iter().filter(|g| g.reg_number == reg_number).cloned().collect();
            v.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
            Ok(v)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: PgPool,
    }

    fn db_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
                RepoError::Conflict("duplicate record")
            }
            other => RepoError::Unavailable(other.to_string()),
        }
    }

    fn row_user(row: &sqlx::postgres::PgRow) -> Result<User, sqlx::Error> {
        let role: String = row.try_get("role")?;
        Ok(User {
            id: row.try_get("id")?,
            role: if role == "teacher" { Role::Teacher } else { Role::Student },
            email: row.try_get("email")?,
            credential_hash: row.try_get("credential_hash")?,
            credits: row.try_get("credits")?,
            name: row.try_get("name")?,
            university: row.try_get("university")?,
            department: row.try_get("department")?,
            anon_id: row.try_get("anon_id")?,
            reg_number: row.try_get("reg_number")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_post(row: &sqlx::postgres::PgRow) -> Result<Post, sqlx::Error> {
        let answers: serde_json::Value = row.try_get("answers")?;
        Ok(Post {
            id: row.try_get("id")?,
            question: row.try_get("question")?,
            posted_by: row.try_get("posted_by")?,
            user_id: row.try_get("user_id")?,
            is_anonymous: row.try_get("is_anonymous")?,
            likes: row.try_get("likes")?,
            answers: serde_json::from_value(answers)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            accepted_answer_id: row.try_get("accepted_answer_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }

    impl PgRepo {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        /// One-shot schema bootstrap; idempotent.
        pub async fn init_schema(&self) -> RepoResult<()> {
            const DDL: &str = r#"
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    role TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    credential_hash TEXT NOT NULL,
                    credits BIGINT NOT NULL DEFAULT 0 CHECK (credits >= 0),
                    name TEXT NOT NULL,
                    university TEXT,
                    department TEXT,
                    anon_id TEXT NOT NULL,
                    reg_number TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE TABLE IF NOT EXISTS follow_requests (
                    id TEXT PRIMARY KEY,
                    from_id TEXT NOT NULL,
                    to_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE TABLE IF NOT EXISTS connections (
                    id TEXT PRIMARY KEY,
                    user1 TEXT NOT NULL,
                    user2 TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    UNIQUE (user1, user2)
                );
                CREATE TABLE IF NOT EXISTS posts (
                    id TEXT PRIMARY KEY,
                    question TEXT NOT NULL,
                    posted_by TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    is_anonymous BOOLEAN NOT NULL,
                    likes BIGINT NOT NULL DEFAULT 0,
                    answers JSONB NOT NULL DEFAULT '[]'::jsonb,
                    accepted_answer_id TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE TABLE IF NOT EXISTS badges (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    points BIGINT NOT NULL CHECK (points > 0),
                    post_id TEXT NOT NULL,
                    answer_id TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    UNIQUE (post_id, answer_id)
                );
                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    sender_id TEXT NOT NULL,
                    receiver_id TEXT NOT NULL,
                    text TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE TABLE IF NOT EXISTS groups (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    profile_pic TEXT NOT NULL DEFAULT '',
                    is_private BOOLEAN NOT NULL DEFAULT FALSE,
                    created_by TEXT NOT NULL,
                    members TEXT[] NOT NULL DEFAULT '{}',
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE TABLE IF NOT EXISTS group_messages (
                    id TEXT PRIMARY KEY,
                    group_id TEXT NOT NULL,
                    sender_id TEXT,
                    text TEXT NOT NULL,
                    system BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE TABLE IF NOT EXISTS moods (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    mood TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE TABLE IF NOT EXISTS grades (
                    id TEXT PRIMARY KEY,
                    reg_number TEXT NOT NULL,
                    subject TEXT NOT NULL,
                    marks TEXT NOT NULL,
                    teacher_name TEXT NOT NULL,
                    file_name TEXT NOT NULL,
                    date TEXT NOT NULL,
                    semester TEXT NOT NULL,
                    department TEXT NOT NULL,
                    test_type TEXT NOT NULL,
                    uploaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
            "#;
            for stmt in DDL.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
            }
            Ok(())
        }

        async fn fetch_user(&self, id: &str) -> RepoResult<User> {
            let row = sqlx::query("SELECT * FROM users WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
            row_user(&row).map_err(db_err)
        }

        async fn connected(&self, a: &str, b: &str) -> RepoResult<bool> {
            let (lo, hi) = Connection::pair(a, b);
            let row = sqlx::query("SELECT 1 FROM connections WHERE user1 = $1 AND user2 = $2")
                .bind(lo)
                .bind(hi)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(row.is_some())
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let res = sqlx::query(
                "INSERT INTO users (id, role, email, credential_hash, name, university, department, anon_id, reg_number)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
            )
            .bind(&new.id)
            .bind(role_str(new.role))
            .bind(&new.email)
            .bind(&new.credential_hash)
            .bind(&new.name)
            .bind(&new.university)
            .bind(&new.department)
            .bind(&new.anon_id)
            .bind(&new.reg_number)
            .execute(&self.pool)
            .await;
            match res {
                Ok(_) => self.fetch_user(&new.id).await,
                Err(e) => match db_err(e) {
                    RepoError::Conflict(_) => Err(RepoError::Conflict("user already exists")),
                    other => Err(other),
                },
            }
        }

        async fn find_by_id(&self, id: &str) -> RepoResult<User> {
            self.fetch_user(id).await
        }

        async fn find_by_email(&self, email: &str) -> RepoResult<User> {
            let row = sqlx::query("SELECT * FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
            row_user(&row).map_err(db_err)
        }

        async fn increment_credits(&self, id: &str, delta: i64) -> RepoResult<()> {
            if delta <= 0 {
                return Err(RepoError::Validation("credit delta must be positive"));
            }
            let res = sqlx::query("UPDATE users SET credits = credits + $2 WHERE id = $1")
                .bind(id)
                .bind(delta)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn update_profile(
            &self,
            id: &str,
            fields: &serde_json::Map<String, serde_json::Value>,
        ) -> RepoResult<User> {
            let as_str =
                |key: &str| fields.get(key).and_then(|v| v.as_str()).map(str::to_string);
            let updatable = ["name", "university", "department", "anon_id", "reg_number"];
            if !updatable.iter().any(|k| fields.contains_key(*k)) {
                return Err(RepoError::Validation("no valid fields to update"));
            }
            let res = sqlx::query(
                "UPDATE users SET
                     name = COALESCE($2, name),
                     university = CASE WHEN $6 THEN $3 ELSE university END,
                     department = CASE WHEN $7 THEN $4 ELSE department END,
                     anon_id = COALESCE($5, anon_id),
                     reg_number = CASE WHEN $8 THEN $9 ELSE reg_number END
                 WHERE id = $1",
            )
            .bind(id)
            .bind(as_str("name"))
            .bind(as_str("university"))
            .bind(as_str("department"))
            .bind(as_str("anon_id"))
            .bind(fields.contains_key("university"))
            .bind(fields.contains_key("department"))
            .bind(fields.contains_key("reg_number"))
            .bind(as_str("reg_number"))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            self.fetch_user(id).await
        }

        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let rows = sqlx::query("SELECT * FROM users ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            rows.iter().map(|r| row_user(r).map_err(db_err)).collect()
        }
    }

    #[async_trait]
    impl LedgerRepo for PgRepo {
        async fn send_request(&self, from: &str, to: &str) -> RepoResult<FollowRequest> {
            if from == to {
                return Err(RepoError::Validation("cannot follow yourself"));
            }
            self.fetch_user(from).await?;
            self.fetch_user(to).await?;
            let pending = sqlx::query(
                "SELECT 1 FROM follow_requests
                 WHERE status = 'pending'
                   AND ((from_id = $1 AND to_id = $2) OR (from_id = $2 AND to_id = $1))",
            )
            .bind(from)
            .bind(to)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
            if pending.is_some() {
                return Err(RepoError::Conflict("request already pending"));
            }
            if self.connected(from, to).await? {
                return Err(RepoError::Conflict("already connected"));
            }
            let req = FollowRequest {
                id: new_id(),
                from: from.to_string(),
                to: to.to_string(),
                status: RequestStatus::Pending,
                created_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO follow_requests (id, from_id, to_id, status, created_at)
                 VALUES ($1,$2,$3,'pending',$4)",
            )
            .bind(&req.id)
            .bind(&req.from)
            .bind(&req.to)
            .bind(req.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(req)
        }

        async fn accept_request(&self, follower: &str, accepter: &str) -> RepoResult<Connection> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            // Compare-and-delete: only one of two racing accepts gets a row
            // back, the other sees NotFound.
            let deleted = sqlx::query(
                "DELETE FROM follow_requests
                 WHERE from_id = $1 AND to_id = $2 AND status = 'pending'
                 RETURNING id",
            )
            .bind(follower)
            .bind(accepter)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
            if deleted.is_none() {
                return Err(RepoError::NotFound);
            }
            let (user1, user2) = Connection::pair(follower, accepter);
            let conn =
                Connection { id: new_id(), user1, user2, created_at: Utc::now() };
            let inserted = sqlx::query(
                "INSERT INTO connections (id, user1, user2, created_at)
                 VALUES ($1,$2,$3,$4)
                 ON CONFLICT (user1, user2) DO NOTHING",
            )
            .bind(&conn.id)
            .bind(&conn.user1)
            .bind(&conn.user2)
            .bind(conn.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            if inserted.rows_affected() == 0 {
                // Stale request against an existing connection.
                return Err(RepoError::Conflict("already connected"));
            }
            Ok(conn)
        }

        async fn reject_request(&self, request_id: &str, by_user: &str) -> RepoResult<()> {
            let row = sqlx::query(
                "SELECT to_id FROM follow_requests WHERE id = $1 AND status = 'pending'",
            )
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)?;
            let to: String = row.try_get("to_id").map_err(db_err)?;
            if to != by_user {
                return Err(RepoError::Forbidden);
            }
            let res = sqlx::query(
                "UPDATE follow_requests SET status = 'rejected'
                 WHERE id = $1 AND status = 'pending'",
            )
            .bind(request_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn list_connections(&self, user: &str) -> RepoResult<Vec<User>> {
            let rows = sqlx::query(
                "SELECT u.* FROM users u
                 JOIN connections c ON u.id = CASE WHEN c.user1 = $1 THEN c.user2 ELSE c.user1 END
                 WHERE c.user1 = $1 OR c.user2 = $1
                 ORDER BY u.name",
            )
            .bind(user)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter().map(|r| row_user(r).map_err(db_err)).collect()
        }

        async fn list_pending(&self, user: &str) -> RepoResult<Vec<User>> {
            let rows = sqlx::query(
                "SELECT u.* FROM users u
                 JOIN follow_requests r ON r.from_id = u.id
                 WHERE r.to_id = $1 AND r.status = 'pending'
                 ORDER BY r.created_at",
            )
            .bind(user)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter().map(|r| row_user(r).map_err(db_err)).collect()
        }

        async fn suggest(&self, user: &str) -> RepoResult<Vec<User>> {
            self.fetch_user(user).await?;
            let rows = sqlx::query(
                "SELECT u.* FROM users u
                 WHERE u.id <> $1
                   AND NOT EXISTS (
                       SELECT 1 FROM connections c
                       WHERE (c.user1 = $1 AND c.user2 = u.id)
                          OR (c.user1 = u.id AND c.user2 = $1))
                   AND NOT EXISTS (
                       SELECT 1 FROM follow_requests r
                       WHERE r.status = 'pending'
                         AND ((r.from_id = $1 AND r.to_id = u.id)
                           OR (r.from_id = u.id AND r.to_id = $1)))
                 ORDER BY u.name",
            )
            .bind(user)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter().map(|r| row_user(r).map_err(db_err)).collect()
        }
    }

    #[async_trait]
    impl BoardRepo for PgRepo {
        async fn create_question(
            &self,
            user_id: &str,
            text: &str,
            is_anonymous: bool,
        ) -> RepoResult<Post> {
            if text.trim().is_empty() {
                return Err(RepoError::Validation("question is required"));
            }
            let user = self.fetch_user(user_id).await?;
            let post = Post {
                id: new_id(),
                question: text.to_string(),
                posted_by: if is_anonymous { user.anon_id } else { user.name },
                user_id: user_id.to_string(),
                is_anonymous,
                likes: 0,
                answers: Vec::new(),
                accepted_answer_id: None,
                created_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO posts (id, question, posted_by, user_id, is_anonymous, likes, answers, created_at)
                 VALUES ($1,$2,$3,$4,$5,0,'[]'::jsonb,$6)",
            )
            .bind(&post.id)
            .bind(&post.question)
            .bind(&post.posted_by)
            .bind(&post.user_id)
            .bind(post.is_anonymous)
            .bind(post.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(post)
        }

        async fn answer_question(
            &self,
            post_id: &str,
            user_id: &str,
            text: &str,
            is_anonymous: bool,
        ) -> RepoResult<Answer> {
            if text.trim().is_empty() {
                return Err(RepoError::Validation("answer text is required"));
            }
            let user = self.fetch_user(user_id).await?;
            let answer = Answer {
                id: new_id(),
                text: text.to_string(),
                posted_by: if is_anonymous { user.anon_id } else { user.name },
                user_id: user_id.to_string(),
                is_anonymous,
                accepted: false,
                created_at: Utc::now(),
            };
            let value = serde_json::to_value(&answer)
                .map_err(|e| RepoError::Unavailable(e.to_string()))?;
            let res = sqlx::query(
                "UPDATE posts SET answers = answers || $2::jsonb WHERE id = $1",
            )
            .bind(post_id)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(answer)
        }

        async fn accept_answer(
            &self,
            post_id: &str,
            answer_id: &str,
            by_user: &str,
            credits: i64,
        ) -> RepoResult<Badge> {
            if credits <= 0 {
                return Err(RepoError::Validation("credits must be positive"));
            }
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let row = sqlx::query("SELECT * FROM posts WHERE id = $1 FOR UPDATE")
                .bind(post_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
                .ok_or(RepoError::NotFound)?;
            let mut post = row_post(&row).map_err(db_err)?;
            if post.user_id != by_user {
                return Err(RepoError::Forbidden);
            }
            if post.accepted_answer_id.is_some() {
                return Err(RepoError::Conflict("an answer is already accepted"));
            }
            let answer = post
                .answers
                .iter_mut()
                .find(|a| a.id == answer_id)
                .ok_or(RepoError::NotFound)?;
            answer.accepted = true;
            let recipient = answer.user_id.clone();
            let answers = serde_json::to_value(&post.answers)
                .map_err(|e| RepoError::Unavailable(e.to_string()))?;
            // Conditional transition doubles as the race guard for callers
            // that bypass the row lock.
            let res = sqlx::query(
                "UPDATE posts SET answers = $2, accepted_answer_id = $3
                 WHERE id = $1 AND accepted_answer_id IS NULL",
            )
            .bind(post_id)
            .bind(answers)
            .bind(answer_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::Conflict("an answer is already accepted"));
            }
            let badge = Badge {
                id: new_id(),
                user_id: recipient.clone(),
                kind: BADGE_ACCEPTED_ANSWER.to_string(),
                points: credits,
                post_id: post_id.to_string(),
                answer_id: answer_id.to_string(),
                created_at: Utc::now(),
            };
            let inserted = sqlx::query(
                "INSERT INTO badges (id, user_id, kind, points, post_id, answer_id, created_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7)
                 ON CONFLICT (post_id, answer_id) DO NOTHING",
            )
            .bind(&badge.id)
            .bind(&badge.user_id)
            .bind(&badge.kind)
            .bind(badge.points)
            .bind(&badge.post_id)
            .bind(&badge.answer_id)
            .bind(badge.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            if inserted.rows_affected() > 0 {
                sqlx::query("UPDATE users SET credits = credits + $2 WHERE id = $1")
                    .bind(&recipient)
                    .bind(credits)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)?;
            Ok(badge)
        }

        async fn like_post(&self, post_id: &str) -> RepoResult<i64> {
            let row = sqlx::query(
                "UPDATE posts SET likes = likes + 1 WHERE id = $1 RETURNING likes",
            )
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)?;
            row.try_get("likes").map_err(db_err)
        }

        async fn get_post(&self, post_id: &str) -> RepoResult<Post> {
            let row = sqlx::query("SELECT * FROM posts WHERE id = $1")
                .bind(post_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
            row_post(&row).map_err(db_err)
        }

        async fn list_posts(&self, user_id: &str, filter: PostFilter) -> RepoResult<Vec<Post>> {
            self.fetch_user(user_id).await?;
            let rows = match filter {
                PostFilter::Recent => {
                    sqlx::query("SELECT * FROM posts ORDER BY created_at DESC")
                        .fetch_all(&self.pool)
                        .await
                }
                PostFilter::Mine => {
                    sqlx::query(
                        "SELECT * FROM posts
                         WHERE user_id = $1
                            OR answers @> jsonb_build_array(jsonb_build_object('user_id', $1::text))
                         ORDER BY created_at DESC",
                    )
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await
                }
                PostFilter::Connections => {
                    sqlx::query(
                        "SELECT p.* FROM posts p
                         WHERE EXISTS (
                             SELECT 1 FROM connections c
                             WHERE (c.user1 = $1 AND c.user2 = p.user_id)
                                OR (c.user1 = p.user_id AND c.user2 = $1))
                         ORDER BY p.created_at DESC",
                    )
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await
                }
            }
            .map_err(db_err)?;
            rows.iter().map(|r| row_post(r).map_err(db_err)).collect()
        }
    }

    #[async_trait]
    impl BadgeRepo for PgRepo {
        async fn award(
            &self,
            recipient: &str,
            points: i64,
            post_id: &str,
            answer_id: &str,
        ) -> RepoResult<Badge> {
            if points <= 0 {
                return Err(RepoError::Validation("points must be positive"));
            }
            self.fetch_user(recipient).await?;
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let badge = Badge {
                id: new_id(),
                user_id: recipient.to_string(),
                kind: BADGE_ACCEPTED_ANSWER.to_string(),
                points,
                post_id: post_id.to_string(),
                answer_id: answer_id.to_string(),
                created_at: Utc::now(),
            };
            let inserted = sqlx::query(
                "INSERT INTO badges (id, user_id, kind, points, post_id, answer_id, created_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7)
                 ON CONFLICT (post_id, answer_id) DO NOTHING",
            )
            .bind(&badge.id)
            .bind(&badge.user_id)
            .bind(&badge.kind)
            .bind(badge.points)
            .bind(&badge.post_id)
            .bind(&badge.answer_id)
            .bind(badge.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            if inserted.rows_affected() == 0 {
                // Already credited; return the existing badge unchanged.
                tx.rollback().await.map_err(db_err)?;
                let row = sqlx::query(
                    "SELECT * FROM badges WHERE post_id = $1 AND answer_id = $2",
                )
                .bind(post_id)
                .bind(answer_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
                return Ok(Badge {
                    id: row.try_get("id").map_err(db_err)?,
                    user_id: row.try_get("user_id").map_err(db_err)?,
                    kind: row.try_get("kind").map_err(db_err)?,
                    points: row.try_get("points").map_err(db_err)?,
                    post_id: row.try_get("post_id").map_err(db_err)?,
                    answer_id: row.try_get("answer_id").map_err(db_err)?,
                    created_at: row.try_get("created_at").map_err(db_err)?,
                });
            }
            sqlx::query("UPDATE users SET credits = credits + $2 WHERE id = $1")
                .bind(recipient)
                .bind(points)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(badge)
        }

        async fn list_badges(&self, user_id: &str) -> RepoResult<Vec<Badge>> {
            let rows = sqlx::query(
                "SELECT * FROM badges WHERE user_id = $1 ORDER BY created_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter()
                .map(|row| {
                    Ok(Badge {
                        id: row.try_get("id").map_err(db_err)?,
                        user_id: row.try_get("user_id").map_err(db_err)?,
                        kind: row.try_get("kind").map_err(db_err)?,
                        points: row.try_get("points").map_err(db_err)?,
                        post_id: row.try_get("post_id").map_err(db_err)?,
                        answer_id: row.try_get("answer_id").map_err(db_err)?,
                        created_at: row.try_get("created_at").map_err(db_err)?,
                    })
                })
                .collect()
        }
    }

    #[async_trait]
    impl ChatRepo for PgRepo {
        async fn send_message(&self, sender: &str, receiver: &str, text: &str) -> RepoResult<Message> {
            if text.trim().is_empty() {
                return Err(RepoError::Validation("message text required"));
            }
            self.fetch_user(receiver).await?;
            if !self.connected(sender, receiver).await? {
                return Err(RepoError::Forbidden);
            }
            let msg = Message {
                id: new_id(),
                sender_id: sender.to_string(),
                receiver_id: receiver.to_string(),
                text: text.to_string(),
                created_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO messages (id, sender_id, receiver_id, text, created_at)
                 VALUES ($1,$2,$3,$4,$5)",
            )
            .bind(&msg.id)
            .bind(&msg.sender_id)
            .bind(&msg.receiver_id)
            .bind(&msg.text)
            .bind(msg.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(msg)
        }

        async fn history(&self, user: &str, partner: &str) -> RepoResult<Vec<Message>> {
            let rows = sqlx::query(
                "SELECT * FROM messages
                 WHERE (sender_id = $1 AND receiver_id = $2)
                    OR (sender_id = $2 AND receiver_id = $1)
                 ORDER BY created_at",
            )
            .bind(user)
            .bind(partner)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter()
                .map(|row| {
                    Ok(Message {
                        id: row.try_get("id").map_err(db_err)?,
                        sender_id: row.try_get("sender_id").map_err(db_err)?,
                        receiver_id: row.try_get("receiver_id").map_err(db_err)?,
                        text: row.try_get("text").map_err(db_err)?,
                        created_at: row.try_get("created_at").map_err(db_err)?,
                    })
                })
                .collect()
        }

        async fn sent_message_times(&self, user: &str) -> RepoResult<Vec<chrono::DateTime<Utc>>> {
            let rows = sqlx::query("SELECT created_at FROM messages WHERE sender_id = $1")
                .bind(user)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            rows.iter().map(|r| r.try_get("created_at").map_err(db_err)).collect()
        }
    }

    fn row_group(row: &sqlx::postgres::PgRow) -> Result<Group, sqlx::Error> {
        Ok(Group {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            profile_pic: row.try_get("profile_pic")?,
            is_private: row.try_get("is_private")?,
            created_by: row.try_get("created_by")?,
            members: row.try_get("members")?,
            created_at: row.try_get("created_at")?,
        })
    }

    impl PgRepo {
        async fn push_system_message(&self, group_id: &str, text: String) -> RepoResult<()> {
            sqlx::query(
                "INSERT INTO group_messages (id, group_id, sender_id, text, system, created_at)
                 VALUES ($1,$2,NULL,$3,TRUE,$4)",
            )
            .bind(new_id())
            .bind(group_id)
            .bind(text)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(())
        }
    }

    #[async_trait]
    impl GroupRepo for PgRepo {
        async fn create_group(&self, creator: &str, new: NewGroup) -> RepoResult<Group> {
            if new.name.trim().is_empty() {
                return Err(RepoError::Validation("group name is required"));
            }
            let anon = self.fetch_user(creator).await?.anon_id;
            let group = Group {
                id: new_id(),
                name: new.name,
                description: new.description,
                profile_pic: new.profile_pic,
                is_private: new.is_private,
                created_by: creator.to_string(),
                members: vec![creator.to_string()],
                created_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO groups (id, name, description, profile_pic, is_private, created_by, members, created_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
            )
            .bind(&group.id)
            .bind(&group.name)
            .bind(&group.description)
            .bind(&group.profile_pic)
            .bind(group.is_private)
            .bind(&group.created_by)
            .bind(&group.members)
            .bind(group.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            self.push_system_message(&group.id, format!("{anon} created the group")).await?;
            Ok(group)
        }

        async fn my_groups(&self, user: &str) -> RepoResult<Vec<Group>> {
            let rows = sqlx::query(
                "SELECT * FROM groups WHERE $1 = ANY(members) ORDER BY created_at DESC",
            )
            .bind(user)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter().map(|r| row_group(r).map_err(db_err)).collect()
        }

        async fn suggest_groups(&self, user: &str) -> RepoResult<Vec<Group>> {
            let rows = sqlx::query(
                "SELECT g.* FROM groups g
                 WHERE NOT ($1 = ANY(g.members))
                   AND (NOT g.is_private OR EXISTS (
                       SELECT 1 FROM connections c
                       WHERE (c.user1 = $1 AND c.user2 = g.created_by)
                          OR (c.user1 = g.created_by AND c.user2 = $1)))
                 ORDER BY g.created_at DESC",
            )
            .bind(user)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter().map(|r| row_group(r).map_err(db_err)).collect()
        }

        async fn join_group(&self, group_id: &str, user: &str) -> RepoResult<()> {
            let anon = self.fetch_user(user).await?.anon_id;
            let res = sqlx::query(
                "UPDATE groups SET members = array_append(members, $2)
                 WHERE id = $1 AND NOT ($2 = ANY(members))",
            )
            .bind(group_id)
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                // Distinguish a missing group from an existing membership.
                let exists = sqlx::query("SELECT 1 FROM groups WHERE id = $1")
                    .bind(group_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?;
                return match exists {
                    Some(_) => Err(RepoError::Conflict("already a member")),
                    None => Err(RepoError::NotFound),
                };
            }
            self.push_system_message(group_id, format!("{anon} joined the group")).await
        }

        async fn leave_group(&self, group_id: &str, user: &str) -> RepoResult<()> {
            let anon = self.fetch_user(user).await?.anon_id;
            let res = sqlx::query(
                "UPDATE groups SET members = array_remove(members, $2)
                 WHERE id = $1 AND $2 = ANY(members)",
            )
            .bind(group_id)
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                let exists = sqlx::query("SELECT 1 FROM groups WHERE id = $1")
                    .bind(group_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?;
                return match exists {
                    Some(_) => Err(RepoError::Validation("not a member of this group")),
                    None => Err(RepoError::NotFound),
                };
            }
            self.push_system_message(group_id, format!("{anon} left the group")).await
        }

        async fn get_group(&self, group_id: &str) -> RepoResult<Group> {
            let row = sqlx::query("SELECT * FROM groups WHERE id = $1")
                .bind(group_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
            row_group(&row).map_err(db_err)
        }

        async fn group_messages(&self, group_id: &str) -> RepoResult<Vec<GroupMessage>> {
            self.get_group(group_id).await?;
            let rows = sqlx::query(
                "SELECT m.*, u.anon_id AS sender_anon
                 FROM group_messages m
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.group_id = $1
                 ORDER BY m.created_at",
            )
            .bind(group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter()
                .map(|row| {
                    Ok(GroupMessage {
                        id: row.try_get("id").map_err(db_err)?,
                        group_id: row.try_get("group_id").map_err(db_err)?,
                        sender_id: row.try_get("sender_id").map_err(db_err)?,
                        sender_anon_id: row.try_get("sender_anon").map_err(db_err)?,
                        text: row.try_get("text").map_err(db_err)?,
                        system: row.try_get("system").map_err(db_err)?,
                        created_at: row.try_get("created_at").map_err(db_err)?,
                    })
                })
                .collect()
        }

        async fn send_group_message(
            &self,
            group_id: &str,
            sender: &str,
            text: &str,
        ) -> RepoResult<GroupMessage> {
            if text.trim().is_empty() {
                return Err(RepoError::Validation("message cannot be empty"));
            }
            let anon = self.fetch_user(sender).await?.anon_id;
            let group = self.get_group(group_id).await?;
            if !group.members.iter().any(|m| m == sender) {
                return Err(RepoError::Forbidden);
            }
            let msg = GroupMessage {
                id: new_id(),
                group_id: group_id.to_string(),
                sender_id: Some(sender.to_string()),
                sender_anon_id: Some(anon),
                text: text.to_string(),
                system: false,
                created_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO group_messages (id, group_id, sender_id, text, system, created_at)
                 VALUES ($1,$2,$3,$4,FALSE,$5)",
            )
            .bind(&msg.id)
            .bind(&msg.group_id)
            .bind(&msg.sender_id)
            .bind(&msg.text)
            .bind(msg.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(msg)
        }

        async fn group_counts(&self, user: &str) -> RepoResult<(i64, i64, i64)> {
            let row = sqlx::query(
                "SELECT
                     (SELECT count(*) FROM groups) AS total,
                     (SELECT count(*) FROM groups WHERE $1 = ANY(members)) AS joined,
                     (SELECT count(*) FROM group_messages WHERE sender_id = $1) AS sent",
            )
            .bind(user)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
            Ok((
                row.try_get("total").map_err(db_err)?,
                row.try_get("joined").map_err(db_err)?,
                row.try_get("sent").map_err(db_err)?,
            ))
        }
    }

    #[async_trait]
    impl WellnessRepo for PgRepo {
        async fn save_mood(&self, user: &str, mood: &str) -> RepoResult<MoodEntry> {
            if mood.trim().is_empty() {
                return Err(RepoError::Validation("mood is required"));
            }
            self.fetch_user(user).await?;
            let entry = MoodEntry {
                id: new_id(),
                user_id: user.to_string(),
                mood: mood.to_string(),
                created_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO moods (id, user_id, mood, created_at) VALUES ($1,$2,$3,$4)",
            )
            .bind(&entry.id)
            .bind(&entry.user_id)
            .bind(&entry.mood)
            .bind(entry.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(entry)
        }

        async fn mood_history(&self, user: &str, limit: usize) -> RepoResult<Vec<MoodEntry>> {
            let rows = sqlx::query(
                "SELECT * FROM moods WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(user)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter()
                .map(|row| {
                    Ok(MoodEntry {
                        id: row.try_get("id").map_err(db_err)?,
                        user_id: row.try_get("user_id").map_err(db_err)?,
                        mood: row.try_get("mood").map_err(db_err)?,
                        created_at: row.try_get("created_at").map_err(db_err)?,
                    })
                })
                .collect()
        }
    }

    #[async_trait]
    impl GradeRepo for PgRepo {
        async fn insert_grades(&self, rows: Vec<Grade>) -> RepoResult<usize> {
            let n = rows.len();
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            for g in rows {
                sqlx::query(
                    "INSERT INTO grades (id, reg_number, subject, marks, teacher_name, file_name,
                                         date, semester, department, test_type, uploaded_at)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
                )
                .bind(&g.id)
                .bind(&g.reg_number)
                .bind(&g.subject)
                .bind(&g.marks)
                .bind(&g.teacher_name)
                .bind(&g.file_name)
                .bind(&g.date)
                .bind(&g.semester)
                .bind(&g.department)
                .bind(&g.test_type)
                .bind(g.uploaded_at)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)?;
            Ok(n)
        }

        async fn grades_for(&self, reg_number: &str) -> RepoResult<Vec<Grade>> {
            let rows = sqlx::query(
                "SELECT * FROM grades WHERE reg_number = $1 ORDER BY uploaded_at DESC",
            )
            .bind(reg_number)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter()
                .map(|row| {
                    Ok(Grade {
                        id: row.try_get("id").map_err(db_err)?,
                        reg_number: row.try_get("reg_number").map_err(db_err)?,
                        subject: row.try_get("subject").map_err(db_err)?,
                        marks: row.try_get("marks").map_err(db_err)?,
                        teacher_name: row.try_get("teacher_name").map_err(db_err)?,
                        file_name: row.try_get("file_name").map_err(db_err)?,
                        date: row.try_get("date").map_err(db_err)?,
                        semester: row.try_get("semester").map_err(db_err)?,
                        department: row.try_get("department").map_err(db_err)?,
                        test_type: row.try_get("test_type").map_err(db_err)?,
                        uploaded_at: row.try_get("uploaded_at").map_err(db_err)?,
                    })
                })
                .collect()
        }
    }
}
