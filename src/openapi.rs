use crate::models::{
    Answer, Badge, Connection, FollowRequest, Grade, NewAnswer, NewQuestion, NewUser, Post, User,
    UserSummary,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::create_user,
        crate::routes::me,
        crate::routes::update_profile,
        crate::routes::suggestions,
        crate::routes::send_follow,
        crate::routes::pending_requests,
        crate::routes::accept_follow,
        crate::routes::reject_follow,
        crate::routes::connections,
        crate::routes::list_posts,
        crate::routes::create_question,
        crate::routes::answer_question,
        crate::routes::accept_answer,
        crate::routes::like_post,
        crate::routes::my_badges,
        crate::routes::upload_grades,
        crate::routes::my_grades,
    ),
    components(schemas(
        User, NewUser, UserSummary, FollowRequest, Connection,
        Post, Answer, NewQuestion, NewAnswer, Badge, Grade,
        crate::routes::SendRequestBody, crate::routes::AcceptRequestBody,
        crate::routes::RejectRequestBody, crate::routes::AcceptAnswerBody
    )),
    tags(
        (name = "users", description = "Directory and relationship ledger"),
        (name = "community", description = "Community Q&A board"),
        (name = "badges", description = "Credit award audit trail"),
        (name = "grades", description = "Grade upload and retrieval"),
    )
)]
pub struct ApiDoc;
