use crate::{
    database::connection::DbPool,
    middleware::auth::AuthenticatedStaff,
    models::notification::NotificationLog,
    models::request::{ListFilter, CreateRequest, Request, RequestError, UpdateRequest},
    requests::request::{
        AvailabilityRequest, DispatchRequest, IntakeRequest, UpdateRequestPayload,
    },
    services::workflow::{Workflow, WorkflowError},
    utils::helpers::ApiResponse,
};
use actix_web::{web, HttpResponse, Result};
use tracing::{error, info};

pub async fn create(
    pool: web::Data<DbPool>,
    request: web::Json<IntakeRequest>,
) -> Result<HttpResponse> {
    info!("Creating spare-part request for {}", request.customer_name);

    let create_request = CreateRequest {
        request_id: request.request_id.clone(),
        customer_name: request.customer_name.clone(),
        customer_email: request.customer_email.clone(),
        customer_phone: request.customer_phone.clone(),
        vehicle_vin: request.vehicle_vin.clone(),
        part_name: request.part_name.clone(),
        notes: request.notes.clone(),
    };

    match Request::create(&pool, create_request).await {
        Ok(created) => {
            info!("Created request {}", created.request_id);
            Ok(HttpResponse::Created().json(ApiResponse::success(created)))
        }
        Err(RequestError::DuplicateId { id }) => Ok(HttpResponse::Conflict().json(
            ApiResponse::<()>::error(format!("Request {} already exists", id)),
        )),
        Err(RequestError::Database(e)) => {
            error!("Database error creating request: {}", e);
            Ok(HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                "Failed to create request".to_string(),
            )))
        }
        Err(e) => {
            error!("Error creating request: {}", e);
            Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(e.to_string())))
        }
    }
}

pub async fn list(
    pool: web::Data<DbPool>,
    filter: web::Query<ListFilter>,
    _staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    match Request::list(&pool, &filter).await {
        Ok(requests) => Ok(HttpResponse::Ok().json(ApiResponse::success(requests))),
        Err(RequestError::Database(e)) => {
            error!("Database error listing requests: {}", e);
            Ok(HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                "Failed to retrieve requests".to_string(),
            )))
        }
        Err(e) => {
            error!("Error listing requests: {}", e);
            Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(e.to_string())))
        }
    }
}

pub async fn get_request(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    _staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();

    match Request::find_by_id(&pool, &request_id).await {
        Ok(Some(request)) => Ok(HttpResponse::Ok().json(ApiResponse::success(request))),
        Ok(None) => Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
            "Request not found".to_string(),
        ))),
        Err(RequestError::Database(e)) => {
            error!("Database error getting request {}: {}", request_id, e);
            Ok(HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                "Failed to retrieve request".to_string(),
            )))
        }
        Err(e) => {
            error!("Error getting request {}: {}", request_id, e);
            Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(e.to_string())))
        }
    }
}

pub async fn update(
    workflow: web::Data<Workflow>,
    path: web::Path<String>,
    payload: web::Json<UpdateRequestPayload>,
    staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();
    info!("Staff {} patching request {}", staff.username, request_id);

    let update_data = UpdateRequest {
        status: payload.status,
        payment_status: payload.payment_status,
        price: payload.price,
        parts_cost: payload.parts_cost,
        freight_cost: payload.freight_cost,
        payment_link: payload.payment_link.clone(),
        notes: payload.notes.clone(),
        whatsapp_sent: payload.whatsapp_sent,
        dispatched_on: payload.dispatched_on,
        tracking_number: payload.tracking_number.clone(),
    };

    // Status changes are validated against the row-locked current state
    // inside the workflow; a manual move to Paid is the audited escape hatch.
    respond_workflow(
        workflow
            .patch(&request_id, update_data, &staff.username)
            .await,
    )
}

pub async fn delete(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();
    info!("Staff {} deleting request {}", staff.username, request_id);

    match Request::delete(&pool, &request_id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::<()>::success(()))),
        Err(RequestError::NotFound { id }) => Ok(HttpResponse::NotFound().json(
            ApiResponse::<()>::error(format!("Request {} not found", id)),
        )),
        Err(e) => {
            error!("Error deleting request {}: {}", request_id, e);
            Ok(HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                "Failed to delete request".to_string(),
            )))
        }
    }
}

pub async fn set_availability(
    workflow: web::Data<Workflow>,
    path: web::Path<String>,
    payload: web::Json<AvailabilityRequest>,
    staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();
    info!(
        "Staff {} setting availability={} on request {}",
        staff.username, payload.available, request_id
    );

    let result = workflow
        .set_availability(
            &request_id,
            payload.available,
            payload.parts_cost,
            payload.freight_cost,
        )
        .await;

    respond_workflow(result)
}

pub async fn send_payment_link(
    workflow: web::Data<Workflow>,
    path: web::Path<String>,
    staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();
    info!(
        "Staff {} sending payment link for request {}",
        staff.username, request_id
    );

    respond_workflow(workflow.send_payment_link(&request_id).await)
}

pub async fn start_processing(
    workflow: web::Data<Workflow>,
    path: web::Path<String>,
    staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();
    info!(
        "Staff {} starting fulfillment for request {}",
        staff.username, request_id
    );

    respond_workflow(workflow.start_processing(&request_id).await)
}

pub async fn dispatch(
    workflow: web::Data<Workflow>,
    path: web::Path<String>,
    payload: web::Json<DispatchRequest>,
    staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();
    info!(
        "Staff {} dispatching request {} with tracking {}",
        staff.username, request_id, payload.tracking_number
    );

    respond_workflow(workflow.dispatch(&request_id, &payload.tracking_number).await)
}

pub async fn mark_paid(
    workflow: web::Data<Workflow>,
    path: web::Path<String>,
    staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();

    respond_workflow(workflow.mark_paid_manual(&request_id, &staff.username).await)
}

pub async fn notifications(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    _staff: AuthenticatedStaff,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();

    match NotificationLog::find_by_request(&pool, &request_id).await {
        Ok(entries) => Ok(HttpResponse::Ok().json(ApiResponse::success(entries))),
        Err(e) => {
            error!("Error loading notifications for {}: {}", request_id, e);
            Ok(HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                "Failed to retrieve notifications".to_string(),
            )))
        }
    }
}

fn respond_workflow(result: Result<Request, WorkflowError>) -> Result<HttpResponse> {
    match result {
        Ok(request) => Ok(HttpResponse::Ok().json(ApiResponse::success(request))),
        Err(WorkflowError::NotFound { id }) => Ok(HttpResponse::NotFound().json(
            ApiResponse::<()>::error(format!("Request {} not found", id)),
        )),
        Err(e @ WorkflowError::InvalidTransition { .. })
        | Err(e @ WorkflowError::MissingCosts)
        | Err(e @ WorkflowError::MissingPaymentLink)
        | Err(e @ WorkflowError::Request(RequestError::NoUpdateFields)) => {
            Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(e.to_string())))
        }
        Err(WorkflowError::Gateway(e)) => {
            error!("Gateway error during workflow transition: {}", e);
            Ok(HttpResponse::BadGateway().json(ApiResponse::<()>::error(
                "Payment gateway error".to_string(),
            )))
        }
        Err(e) => {
            error!("Workflow error: {}", e);
            Ok(HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                "Internal error".to_string(),
            )))
        }
    }
}
