//! warp routes over [`ProposalService`]

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use treeforge_core::{JobId, ProjectId, ProposalId, ProposalStatus, TreeId, UserId};
use treeforge_pipeline::{AcceptRequest, ProposalService, ServiceError};
use treeforge_store::DeleteSelection;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReviewAction {
    Accept,
    Reject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewBody {
    action: ReviewAction,
    user_id: UserId,
    #[serde(default)]
    proposal_ids: Vec<ProposalId>,
    #[serde(default)]
    tree_id: Option<TreeId>,
    /// Build inline and return the outcome instead of a job id
    #[serde(default)]
    sync: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody {
    user_id: UserId,
    #[serde(default)]
    clear_all: bool,
    #[serde(default)]
    proposal_ids: Option<Vec<ProposalId>>,
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    user: Option<UserId>,
    status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobAccepted {
    job_id: JobId,
}

pub(crate) fn routes(
    service: ProposalService,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let list = warp::path!("projects" / ProjectId / "proposals")
        .and(warp::get())
        .and(warp::query::<ListParams>())
        .and(with_service(service.clone()))
        .and_then(list_proposals);

    let review = warp::path!("projects" / ProjectId / "proposals")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_service(service.clone()))
        .and_then(review_proposals);

    let remove = warp::path!("projects" / ProjectId / "proposals")
        .and(warp::delete())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_service(service.clone()))
        .and_then(delete_proposals);

    let job = warp::path!("jobs" / JobId)
        .and(warp::get())
        .and(with_service(service.clone()))
        .and_then(get_job);

    let tree = warp::path!("trees" / TreeId)
        .and(warp::get())
        .and(with_service(service))
        .and_then(get_tree);

    list.or(review)
        .or(remove)
        .or(job)
        .or(tree)
        .with(warp::trace::request())
        .recover(handle_rejection)
}

fn with_service(
    service: ProposalService,
) -> impl Filter<Extract = (ProposalService,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

async fn list_proposals(
    project_id: ProjectId,
    params: ListParams,
    service: ProposalService,
) -> Result<Response, Infallible> {
    let status = match params.status.as_deref().map(str::parse::<ProposalStatus>) {
        Some(Ok(status)) => Some(status),
        Some(Err(err)) => return Ok(error_reply(&ServiceError::validation(err.to_string()))),
        None => None,
    };
    Ok(match service.list(project_id, params.user, status).await {
        Ok(proposals) => warp::reply::json(&proposals).into_response(),
        Err(err) => error_reply(&err),
    })
}

async fn review_proposals(
    project_id: ProjectId,
    body: ReviewBody,
    service: ProposalService,
) -> Result<Response, Infallible> {
    let reply = match body.action {
        ReviewAction::Reject => service
            .reject(project_id, body.user_id, &body.proposal_ids)
            .await
            .map(|rejected| warp::reply::json(&json!({ "rejected": rejected })).into_response()),
        ReviewAction::Accept => {
            let request = AcceptRequest {
                project_id,
                user_id: body.user_id,
                proposal_ids: body.proposal_ids,
                tree_id: body.tree_id,
            };
            if body.sync {
                service
                    .accept_sync(request)
                    .await
                    .map(|outcome| warp::reply::json(&outcome).into_response())
            } else {
                service.accept(request).await.map(|job_id| {
                    warp::reply::with_status(
                        warp::reply::json(&JobAccepted { job_id }),
                        StatusCode::ACCEPTED,
                    )
                    .into_response()
                })
            }
        }
    };
    Ok(reply.unwrap_or_else(|err| error_reply(&err)))
}

async fn delete_proposals(
    project_id: ProjectId,
    body: DeleteBody,
    service: ProposalService,
) -> Result<Response, Infallible> {
    let selection = if body.clear_all {
        DeleteSelection::All
    } else {
        DeleteSelection::Ids(body.proposal_ids.unwrap_or_default())
    };
    Ok(match service.delete(project_id, body.user_id, selection).await {
        Ok(deleted) => warp::reply::json(&json!({ "deleted": deleted })).into_response(),
        Err(err) => error_reply(&err),
    })
}

async fn get_job(job_id: JobId, service: ProposalService) -> Result<Response, Infallible> {
    Ok(match service.job(job_id).await {
        Ok(job) => warp::reply::json(&job).into_response(),
        Err(err) => error_reply(&err),
    })
}

async fn get_tree(tree_id: TreeId, service: ProposalService) -> Result<Response, Infallible> {
    Ok(match service.tree(tree_id).await {
        Ok(snapshot) => warp::reply::json(&snapshot).into_response(),
        Err(err) => error_reply(&err),
    })
}

fn error_reply(err: &ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
    }
    json_error(status, &err.to_string())
}

fn json_error(status: StatusCode, message: &str) -> Response {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status)
        .into_response()
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "route not found".to_string())
    } else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, err.to_string())
    } else if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, err.to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        tracing::error!(?rejection, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(json_error(status, &message))
}
