use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::{NaiveDate, Utc};
use futures_util::TryStreamExt as _;
use std::collections::BTreeSet;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::ingest;
use crate::models::*;
use crate::notify::Notifier;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::require_role;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            // directory + relationship ledger
            .service(web::resource("/users").route(web::post().to(create_user)))
            .service(web::resource("/users/me").route(web::get().to(me)))
            .service(web::resource("/users/me/profile").route(web::put().to(update_profile)))
            .service(web::resource("/users/by-email").route(web::get().to(user_by_email)))
            .service(web::resource("/users/suggestions").route(web::get().to(suggestions)))
            .service(web::resource("/users/requests/send").route(web::post().to(send_follow)))
            .service(web::resource("/users/requests/pending").route(web::get().to(pending_requests)))
            .service(web::resource("/users/requests/accept").route(web::post().to(accept_follow)))
            .service(web::resource("/users/requests/reject").route(web::post().to(reject_follow)))
            .service(web::resource("/users/connections").route(web::get().to(connections)))
            // community board
            .service(
                web::resource("/community")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_question)),
            )
            .service(web::resource("/community/{post_id}").route(web::get().to(get_post)))
            .service(
                web::resource("/community/{post_id}/answers")
                    .route(web::post().to(answer_question)),
            )
            .service(
                web::resource("/community/{post_id}/accept/{answer_id}")
                    .route(web::put().to(accept_answer)),
            )
            .service(web::resource("/community/{post_id}/like").route(web::put().to(like_post)))
            // credit/badge issuer read surface
            .service(web::resource("/badges/mine").route(web::get().to(my_badges)))
            // direct chat
            .service(
                web::resource("/chat/messages/{partner}")
                    .route(web::get().to(chat_history))
                    .route(web::post().to(send_message)),
            )
            // study groups
            .service(web::resource("/groups").route(web::post().to(create_group)))
            .service(web::resource("/groups/mine").route(web::get().to(my_groups)))
            .service(web::resource("/groups/suggestions").route(web::get().to(group_suggestions)))
            .service(web::resource("/groups/{id}").route(web::get().to(group_details)))
            .service(web::resource("/groups/{id}/join").route(web::post().to(join_group)))
            .service(web::resource("/groups/{id}/leave").route(web::post().to(leave_group)))
            .service(
                web::resource("/groups/{id}/messages")
                    .route(web::get().to(group_messages))
                    .route(web::post().to(send_group_message)),
            )
            // wellness
            .service(web::resource("/wellness/mood").route(web::post().to(save_mood)))
            .service(web::resource("/wellness/history").route(web::get().to(mood_history)))
            .service(web::resource("/wellness/summary").route(web::get().to(wellness_summary)))
            .service(web::resource("/wellness/correlation").route(web::get().to(wellness_correlation)))
            // grades
            .service(web::resource("/teacher/grades").route(web::post().to(upload_grades)))
            .service(web::resource("/student/grades").route(web::get().to(my_grades))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub notifier: Arc<dyn Notifier>,
    pub limits: RateLimiterFacade,
}

// ---------------- directory ----------------

#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = NewUser,
    responses(
        (status = 201, description = "Directory record provisioned", body = User),
        (status = 403, description = "Record id does not match the verified caller"),
        (status = 409, description = "User or email already exists")
    )
)]
pub async fn create_user(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewUser>,
) -> Result<HttpResponse, ApiError> {
    // Provisioning only: the external auth service verified this subject,
    // a caller may only create the record matching their own token.
    if payload.id != auth.0.sub {
        return Err(ApiError::Forbidden);
    }
    let user = data.repo.create_user(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(user))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 404, description = "No directory record for caller")
    )
)]
pub async fn me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.find_by_id(&auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/me/profile",
    responses(
        (status = 200, description = "Profile updated", body = User),
        (status = 400, description = "No updatable fields supplied")
    )
)]
pub async fn update_profile(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.update_profile(&auth.0.sub, &payload).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[derive(serde::Deserialize)]
pub struct EmailQuery {
    email: String,
}

pub async fn user_by_email(
    _auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<EmailQuery>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.find_by_email(&query.email).await?;
    Ok(HttpResponse::Ok().json(user))
}

// ---------------- relationship ledger ----------------

fn summaries(users: Vec<User>) -> Vec<UserSummary> {
    users.iter().map(UserSummary::from).collect()
}

#[utoipa::path(
    get,
    path = "/api/v1/users/suggestions",
    responses((status = 200, description = "Users the caller could connect with", body = [UserSummary]))
)]
pub async fn suggestions(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let users = data.repo.suggest(&auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(summaries(users)))
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
pub struct SendRequestBody {
    pub to_id: Id,
}

#[utoipa::path(
    post,
    path = "/api/v1/users/requests/send",
    request_body = SendRequestBody,
    responses(
        (status = 201, description = "Follow request created", body = FollowRequest),
        (status = 400, description = "Cannot follow yourself"),
        (status = 409, description = "Already pending or already connected")
    )
)]
pub async fn send_follow(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<SendRequestBody>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_follow(&auth.0.sub) {
        return Err(ApiError::RateLimited);
    }
    let req = data.repo.send_request(&auth.0.sub, &payload.to_id).await?;
    Ok(HttpResponse::Created().json(req))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/requests/pending",
    responses((status = 200, description = "Users with a pending request to the caller", body = [UserSummary]))
)]
pub async fn pending_requests(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let users = data.repo.list_pending(&auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(summaries(users)))
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
pub struct AcceptRequestBody {
    pub from_id: Id,
}

#[utoipa::path(
    post,
    path = "/api/v1/users/requests/accept",
    request_body = AcceptRequestBody,
    responses(
        (status = 200, description = "Connection created", body = Connection),
        (status = 404, description = "No pending request from that user")
    )
)]
pub async fn accept_follow(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<AcceptRequestBody>,
) -> Result<HttpResponse, ApiError> {
    let conn = data.repo.accept_request(&payload.from_id, &auth.0.sub).await?;
    data.notifier
        .notify(
            &payload.from_id,
            serde_json::json!({ "kind": "request_accepted", "by": auth.0.sub }),
        )
        .await;
    Ok(HttpResponse::Ok().json(conn))
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
pub struct RejectRequestBody {
    pub request_id: Id,
}

#[utoipa::path(
    post,
    path = "/api/v1/users/requests/reject",
    request_body = RejectRequestBody,
    responses(
        (status = 200, description = "Request rejected"),
        (status = 403, description = "Caller is not the request recipient"),
        (status = 404, description = "Request not found")
    )
)]
pub async fn reject_follow(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<RejectRequestBody>,
) -> Result<HttpResponse, ApiError> {
    data.repo.reject_request(&payload.request_id, &auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "ok"})))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/connections",
    responses((status = 200, description = "Connected users", body = [UserSummary]))
)]
pub async fn connections(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let users = data.repo.list_connections(&auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(summaries(users)))
}

// ---------------- community board ----------------

#[derive(serde::Deserialize)]
pub struct PostQuery {
    #[serde(default)]
    filter: PostFilter,
}

#[utoipa::path(
    get,
    path = "/api/v1/community",
    params(("filter" = Option<String>, Query, description = "recent | mine | connections")),
    responses((status = 200, description = "Posts for the requested view", body = [Post]))
)]
pub async fn list_posts(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<PostQuery>,
) -> Result<HttpResponse, ApiError> {
    let posts = data.repo.list_posts(&auth.0.sub, query.filter).await?;
    Ok(HttpResponse::Ok().json(posts))
}

#[utoipa::path(
    post,
    path = "/api/v1/community",
    request_body = NewQuestion,
    responses(
        (status = 201, description = "Question posted", body = Post),
        (status = 400, description = "Question text is blank")
    )
)]
pub async fn create_question(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewQuestion>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_post(&auth.0.sub) {
        return Err(ApiError::RateLimited);
    }
    let post = data
        .repo
        .create_question(&auth.0.sub, &payload.question, payload.is_anonymous)
        .await?;
    Ok(HttpResponse::Created().json(post))
}

pub async fn get_post(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    post,
    path = "/api/v1/community/{post_id}/answers",
    request_body = NewAnswer,
    params(("post_id" = String, Path, description = "Post id")),
    responses(
        (status = 201, description = "Answer added", body = Answer),
        (status = 404, description = "Post not found")
    )
)]
pub async fn answer_question(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewAnswer>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_answer(&auth.0.sub) {
        return Err(ApiError::RateLimited);
    }
    let answer = data
        .repo
        .answer_question(&path.into_inner(), &auth.0.sub, &payload.text, payload.is_anonymous)
        .await?;
    Ok(HttpResponse::Created().json(answer))
}

#[derive(serde::Deserialize, Default, utoipa::ToSchema)]
pub struct AcceptAnswerBody {
    pub credits: Option<i64>,
}

const DEFAULT_ANSWER_CREDITS: i64 = 10;

#[utoipa::path(
    put,
    path = "/api/v1/community/{post_id}/accept/{answer_id}",
    request_body = AcceptAnswerBody,
    params(
        ("post_id" = String, Path, description = "Post id"),
        ("answer_id" = String, Path, description = "Answer id")
    ),
    responses(
        (status = 200, description = "Answer accepted, credits awarded", body = Badge),
        (status = 400, description = "Credits must be positive"),
        (status = 403, description = "Only the question owner may accept"),
        (status = 409, description = "An answer is already accepted")
    )
)]
pub async fn accept_answer(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
    payload: Option<web::Json<AcceptAnswerBody>>,
) -> Result<HttpResponse, ApiError> {
    let (post_id, answer_id) = path.into_inner();
    let credits = payload
        .map(|p| p.into_inner())
        .unwrap_or_default()
        .credits
        .unwrap_or(DEFAULT_ANSWER_CREDITS);
    let badge = data
        .repo
        .accept_answer(&post_id, &answer_id, &auth.0.sub, credits)
        .await?;
    data.notifier
        .notify(
            &badge.user_id,
            serde_json::json!({ "kind": "answer_accepted", "post_id": post_id, "points": badge.points }),
        )
        .await;
    Ok(HttpResponse::Ok().json(badge))
}

#[utoipa::path(
    put,
    path = "/api/v1/community/{post_id}/like",
    params(("post_id" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Like recorded"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn like_post(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let likes = data.repo.like_post(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"likes": likes})))
}

// ---------------- badges ----------------

#[utoipa::path(
    get,
    path = "/api/v1/badges/mine",
    responses((status = 200, description = "Caller's credit-award audit trail", body = [Badge]))
)]
pub async fn my_badges(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let badges = data.repo.list_badges(&auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(badges))
}

// ---------------- direct chat ----------------

#[derive(serde::Deserialize, utoipa::ToSchema)]
pub struct NewMessageBody {
    pub text: String,
}

pub async fn chat_history(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let msgs = data.repo.history(&auth.0.sub, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(msgs))
}

pub async fn send_message(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewMessageBody>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_message(&auth.0.sub) {
        return Err(ApiError::RateLimited);
    }
    let receiver = path.into_inner();
    let msg = data.repo.send_message(&auth.0.sub, &receiver, &payload.text).await?;
    // Notify only after the write committed; delivery stays best-effort.
    data.notifier
        .notify(&receiver, serde_json::json!({ "kind": "direct_message", "message": &msg }))
        .await;
    Ok(HttpResponse::Created().json(msg))
}

// ---------------- study groups ----------------

#[derive(serde::Serialize)]
pub struct GroupDetails {
    #[serde(flatten)]
    pub group: Group,
    pub members_anon_ids: Vec<String>,
}

pub async fn create_group(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewGroup>,
) -> Result<HttpResponse, ApiError> {
    let group = data.repo.create_group(&auth.0.sub, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(group))
}

pub async fn my_groups(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let groups = data.repo.my_groups(&auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(groups))
}

pub async fn group_suggestions(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let groups = data.repo.suggest_groups(&auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(groups))
}

pub async fn group_details(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let group = data.repo.get_group(&path.into_inner()).await?;
    let mut members_anon_ids = Vec::with_capacity(group.members.len());
    for member in &group.members {
        match data.repo.find_by_id(member).await {
            Ok(u) => members_anon_ids.push(u.anon_id),
            Err(_) => members_anon_ids.push("Anonymous".to_string()),
        }
    }
    Ok(HttpResponse::Ok().json(GroupDetails { group, members_anon_ids }))
}

pub async fn join_group(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo.join_group(&path.into_inner(), &auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "ok"})))
}

pub async fn leave_group(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo.leave_group(&path.into_inner(), &auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "ok"})))
}

pub async fn group_messages(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let msgs = data.repo.group_messages(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(msgs))
}

pub async fn send_group_message(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewMessageBody>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_message(&auth.0.sub) {
        return Err(ApiError::RateLimited);
    }
    let group_id = path.into_inner();
    let msg = data.repo.send_group_message(&group_id, &auth.0.sub, &payload.text).await?;
    let group = data.repo.get_group(&group_id).await?;
    for member in group.members.iter().filter(|m| **m != auth.0.sub) {
        data.notifier
            .notify(member, serde_json::json!({ "kind": "group_message", "message": &msg }))
            .await;
    }
    Ok(HttpResponse::Created().json(msg))
}

// ---------------- wellness ----------------

#[derive(serde::Deserialize, utoipa::ToSchema)]
pub struct MoodBody {
    pub mood: String,
}

pub async fn save_mood(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<MoodBody>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_mood(&auth.0.sub) {
        return Err(ApiError::RateLimited);
    }
    let entry = data.repo.save_mood(&auth.0.sub, &payload.mood).await?;
    Ok(HttpResponse::Created().json(entry))
}

const MOOD_HISTORY_LIMIT: usize = 30;

pub async fn mood_history(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let entries = data.repo.mood_history(&auth.0.sub, MOOD_HISTORY_LIMIT).await?;
    Ok(HttpResponse::Ok().json(entries))
}

pub async fn wellness_summary(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let times = data.repo.sent_message_times(&auth.0.sub).await?;
    if times.is_empty() {
        return Ok(HttpResponse::Ok().json(serde_json::json!({
            "peer_sessions": 0,
            "peer_contributions": 0,
            "wellness_streak": 0
        })));
    }
    let dates: BTreeSet<NaiveDate> = times.iter().map(|t| t.date_naive()).collect();
    // Consecutive-day run ending at the most recent active day.
    let mut streak = 0u32;
    let mut prev: Option<NaiveDate> = None;
    for day in dates.iter().rev() {
        match prev {
            None => streak = 1,
            Some(p) if (p - *day).num_days() == 1 => streak += 1,
            Some(_) => break,
        }
        prev = Some(*day);
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "peer_sessions": dates.len(),
        "peer_contributions": times.len(),
        "wellness_streak": streak
    })))
}

fn impact(value: f64) -> f64 {
    (value.min(100.0).max(0.0) * 100.0).round() / 100.0
}

pub async fn wellness_correlation(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user = &auth.0.sub;

    let (total_groups, joined, group_msgs) = data.repo.group_counts(user).await?;
    let study_group_activity =
        impact((joined + group_msgs) as f64 / total_groups.max(1) as f64 * 50.0);

    let badges = data.repo.list_badges(user).await?;
    let peer_help_given = impact(badges.len() as f64 * 10.0);

    let posts = data.repo.list_posts(user, PostFilter::Mine).await?;
    let own: Vec<_> = posts.iter().filter(|p| p.user_id == *user).collect();
    let answers_received = if own.is_empty() {
        0.0
    } else {
        let answers: usize = own.iter().map(|p| p.answers.len()).sum();
        impact(answers as f64 / own.len() as f64 * 100.0)
    };

    let sent = data.repo.sent_message_times(user).await?.len();
    let peers = data.repo.list_connections(user).await?.len();
    let connected_discussions = if peers == 0 {
        0.0
    } else {
        impact(sent as f64 / (peers as f64 * 10.0) * 100.0)
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "correlation": [
            { "activity": "Study Group Activity", "impact": study_group_activity },
            { "activity": "Peer Help Given", "impact": peer_help_given },
            { "activity": "Answers Received", "impact": answers_received },
            { "activity": "Connected Discussions", "impact": connected_discussions },
        ]
    })))
}

// ---------------- grades ----------------

const GRADE_FILE_SIZE_LIMIT: usize = 2 * 1024 * 1024; // 2 MB

#[utoipa::path(
    post,
    path = "/api/v1/teacher/grades",
    responses(
        (status = 201, description = "Grades ingested"),
        (status = 400, description = "Missing metadata or unparseable file"),
        (status = 403, description = "Teachers only"),
        (status = 413, description = "File too large")
    )
)]
pub async fn upload_grades(
    auth: Auth,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    require_role!(auth, Role::Teacher);
    let teacher = data.repo.find_by_id(&auth.0.sub).await?;

    let mut file_bytes: Vec<u8> = Vec::new();
    let mut file_name = String::new();
    let mut meta: std::collections::HashMap<String, String> = std::collections::HashMap::new();

    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        let Some(name) = field.content_disposition().get_name().map(str::to_string) else {
            continue;
        };
        if name == "file" {
            file_name = field
                .content_disposition()
                .get_filename()
                .unwrap_or("grades.csv")
                .to_string();
            while let Some(chunk) = field.try_next().await.map_err(|e| {
                log::error!("stream read error: {e}");
                ApiError::Internal
            })? {
                if file_bytes.len() + chunk.len() > GRADE_FILE_SIZE_LIMIT {
                    return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
                }
                file_bytes.extend_from_slice(&chunk);
            }
        } else {
            let mut value = Vec::new();
            while let Some(chunk) = field.try_next().await.map_err(|e| {
                log::error!("stream read error: {e}");
                ApiError::Internal
            })? {
                value.extend_from_slice(&chunk);
            }
            meta.insert(name, String::from_utf8_lossy(&value).trim().to_string());
        }
    }

    let require = |key: &str| -> Result<String, ApiError> {
        match meta.get(key) {
            Some(v) if !v.is_empty() => Ok(v.clone()),
            _ => Err(ApiError::Validation(format!("{key} is required"))),
        }
    };
    let date = require("date")?;
    let semester = require("semester")?;
    let department = require("department")?;
    let test_type = require("test_type")?;

    if file_bytes.is_empty() {
        return Err(ApiError::Validation("file is required".into()));
    }
    if !file_name.to_lowercase().ends_with(".csv") {
        return Err(ApiError::Validation("only .csv files are supported".into()));
    }

    let rows = ingest::parse_grade_csv(&file_bytes)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let uploaded_at = Utc::now();
    let grades: Vec<Grade> = rows
        .into_iter()
        .map(|r| Grade {
            id: new_id(),
            reg_number: r.reg_number,
            subject: r.subject,
            marks: r.marks,
            teacher_name: teacher.name.clone(),
            file_name: file_name.clone(),
            date: date.clone(),
            semester: semester.clone(),
            department: department.clone(),
            test_type: test_type.clone(),
            uploaded_at,
        })
        .collect();
    let inserted = data.repo.insert_grades(grades).await?;
    Ok(HttpResponse::Created().json(serde_json::json!({"status": "ok", "inserted": inserted})))
}

#[utoipa::path(
    get,
    path = "/api/v1/student/grades",
    responses(
        (status = 200, description = "Grades for the caller's register number", body = [Grade]),
        (status = 400, description = "Caller has no register number"),
        (status = 403, description = "Students only")
    )
)]
pub async fn my_grades(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Student);
    let student = data.repo.find_by_id(&auth.0.sub).await?;
    let Some(reg_number) = student.reg_number else {
        return Err(ApiError::Validation("student has no register number".into()));
    };
    let grades = data.repo.grades_for(&reg_number).await?;
    Ok(HttpResponse::Ok().json(grades))
}
