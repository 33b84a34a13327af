//! HTTP handlers for HQS
//!
//! JSON protocol: `POST /` with `X-Amz-Target: Hqs.<Operation>` and a JSON
//! body with PascalCase fields.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;
use hqs_core::{ErrorCode, HqsError, RequestId, REQUEST_ID_HEADER};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::queue::QueueConfig;
use crate::service::{
    BatchFailure, DeleteBatchEntry, QueueError, QueueService, ReceiveOptions, ReceivedMessage,
    SendBatchEntry,
};

const TARGET_PREFIX: &str = "Hqs.";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Handle HQS requests based on the X-Amz-Target header
pub async fn handle_request(
    State(service): State<Arc<QueueService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = RequestId::new();
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    info!(target = %target, request_id = %request_id, "HQS request");

    let operation = target.strip_prefix(TARGET_PREFIX).unwrap_or("");
    let result = match operation {
        "CreateQueue" => create_queue(&service, &body),
        "DeleteQueue" => delete_queue(&service, &body),
        "ListQueues" => list_queues(&service, &body),
        "GetQueueUrl" => get_queue_url(&service, &body),
        "PurgeQueue" => purge_queue(&service, &body),
        "GetQueueAttributes" => get_queue_attributes(&service, &body),
        "SendMessage" => send_message(&service, &body),
        "SendMessageBatch" => send_message_batch(&service, &body),
        "ReceiveMessage" => receive_message(&service, &body).await,
        "DeleteMessage" => delete_message(&service, &body),
        "DeleteMessageBatch" => delete_message_batch(&service, &body),
        "ChangeMessageVisibility" => change_message_visibility(&service, &body),
        _ => {
            warn!(target = %target, "Unknown HQS operation");
            let error = HqsError::new(
                ErrorCode::UnknownOperation,
                format!("Unknown operation: {target}"),
            );
            return error_response(error, &request_id);
        }
    };

    match result {
        Ok(value) => json_response(StatusCode::OK, value.to_string(), &request_id),
        Err(e) => {
            let error = HqsError::new(e.code(), e.to_string());
            error_response(error, &request_id)
        }
    }
}

// === Request shapes ===

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateQueueRequest {
    queue_name: String,
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueueUrlRequest {
    queue_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListQueuesRequest {
    queue_name_prefix: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueueUrlRequest {
    queue_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageRequest {
    queue_url: String,
    message_body: String,
    #[serde(default)]
    message_attributes: BTreeMap<String, String>,
    delay_seconds: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageBatchRequest {
    queue_url: String,
    entries: Vec<SendMessageBatchRequestEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageBatchRequestEntry {
    id: String,
    message_body: String,
    #[serde(default)]
    message_attributes: BTreeMap<String, String>,
    delay_seconds: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageRequest {
    queue_url: String,
    max_number_of_messages: Option<u32>,
    visibility_timeout: Option<u32>,
    wait_time_seconds: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteMessageRequest {
    queue_url: String,
    receipt_handle: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteMessageBatchRequest {
    queue_url: String,
    entries: Vec<DeleteMessageBatchRequestEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteMessageBatchRequestEntry {
    id: String,
    receipt_handle: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeMessageVisibilityRequest {
    queue_url: String,
    receipt_handle: String,
    visibility_timeout: u32,
}

// === Handlers ===

fn create_queue(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: CreateQueueRequest = parse(body)?;
    let config = with_defaults(service.default_queue_config(), request.attributes)?;
    let info = service.create_queue(&request.queue_name, config)?;
    Ok(json!({ "QueueUrl": info.url, "QueueId": info.id }))
}

fn delete_queue(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: QueueUrlRequest = parse(body)?;
    service.delete_queue(&request.queue_url)?;
    Ok(json!({}))
}

fn list_queues(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: ListQueuesRequest = parse(body)?;
    let urls = service.list_queues(request.queue_name_prefix.as_deref());
    Ok(json!({ "QueueUrls": urls }))
}

fn get_queue_url(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: GetQueueUrlRequest = parse(body)?;
    let url = service.get_queue_url(&request.queue_name)?;
    Ok(json!({ "QueueUrl": url }))
}

fn purge_queue(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: QueueUrlRequest = parse(body)?;
    service.purge_queue(&request.queue_url)?;
    Ok(json!({}))
}

fn get_queue_attributes(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: QueueUrlRequest = parse(body)?;
    let attributes = service.get_queue_attributes(&request.queue_url)?;
    let config = &attributes.info.config;
    let stats = attributes.stats;
    Ok(json!({
        "Attributes": {
            "QueueId": attributes.info.id,
            "CreatedTimestamp": attributes.info.created_timestamp.to_string(),
            "VisibilityTimeout": config.visibility_timeout.to_string(),
            "MaximumMessageSize": config.maximum_message_size.to_string(),
            "MessageRetentionPeriod": config.message_retention_period.to_string(),
            "DelaySeconds": config.delay_seconds.to_string(),
            "ReceiveMessageWaitTimeSeconds": config.receive_message_wait_time_seconds.to_string(),
            "ApproximateNumberOfMessages": stats.available.to_string(),
            "ApproximateNumberOfMessagesNotVisible": stats.in_flight.to_string(),
            "ApproximateNumberOfMessagesDelayed": stats.delayed.to_string(),
        }
    }))
}

fn send_message(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: SendMessageRequest = parse(body)?;
    let sent = service.send_message(
        &request.queue_url,
        Bytes::from(request.message_body),
        request.message_attributes,
        request.delay_seconds.map(seconds),
    )?;
    Ok(json!({
        "MessageId": sent.message_id,
        "MD5OfMessageBody": sent.md5_of_body,
    }))
}

fn send_message_batch(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: SendMessageBatchRequest = parse(body)?;
    let entries = request
        .entries
        .into_iter()
        .map(|e| SendBatchEntry {
            id: e.id,
            body: Bytes::from(e.message_body),
            attributes: e.message_attributes,
            delay: e.delay_seconds.map(seconds),
        })
        .collect();
    let outcome = service.send_message_batch(&request.queue_url, entries)?;

    let successful: Vec<Value> = outcome
        .successful
        .iter()
        .map(|s| {
            json!({
                "Id": s.id,
                "MessageId": s.message_id,
                "MD5OfMessageBody": s.md5_of_body,
            })
        })
        .collect();
    Ok(json!({
        "Successful": successful,
        "Failed": failures(&outcome.failed),
    }))
}

async fn receive_message(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: ReceiveMessageRequest = parse(body)?;
    let options = ReceiveOptions {
        max_messages: request.max_number_of_messages.unwrap_or(1),
        visibility_timeout: request.visibility_timeout.map(seconds),
        wait_time: request.wait_time_seconds.map(seconds),
    };
    let messages = service.receive_message(&request.queue_url, options).await?;
    let messages: Vec<Value> = messages.iter().map(message_json).collect();
    Ok(json!({ "Messages": messages }))
}

fn delete_message(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: DeleteMessageRequest = parse(body)?;
    service.delete_message(&request.queue_url, &request.receipt_handle)?;
    Ok(json!({}))
}

fn delete_message_batch(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: DeleteMessageBatchRequest = parse(body)?;
    let entries = request
        .entries
        .into_iter()
        .map(|e| DeleteBatchEntry {
            id: e.id,
            receipt_handle: e.receipt_handle,
        })
        .collect();
    let outcome = service.delete_message_batch(&request.queue_url, entries)?;

    let successful: Vec<Value> = outcome
        .successful
        .iter()
        .map(|id| json!({ "Id": id }))
        .collect();
    Ok(json!({
        "Successful": successful,
        "Failed": failures(&outcome.failed),
    }))
}

fn change_message_visibility(service: &QueueService, body: &Bytes) -> Result<Value, QueueError> {
    let request: ChangeMessageVisibilityRequest = parse(body)?;
    service.change_message_visibility(
        &request.queue_url,
        &request.receipt_handle,
        seconds(request.visibility_timeout),
    )?;
    Ok(json!({}))
}

// === Helpers ===

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, QueueError> {
    let raw: &[u8] = if body.is_empty() { b"{}" } else { &body[..] };
    serde_json::from_slice(raw).map_err(|e| QueueError::InvalidRequest(e.to_string()))
}

/// Overlay explicitly given attributes on the service's default queue config
fn with_defaults(
    defaults: &QueueConfig,
    attributes: serde_json::Map<String, Value>,
) -> Result<QueueConfig, QueueError> {
    let invalid = |e: serde_json::Error| QueueError::InvalidRequest(e.to_string());
    let mut merged = serde_json::to_value(defaults).map_err(invalid)?;
    if let Value::Object(fields) = &mut merged {
        fields.extend(attributes);
    }
    serde_json::from_value(merged).map_err(invalid)
}

fn seconds(secs: u32) -> Duration {
    Duration::from_secs(secs.into())
}

fn message_json(message: &ReceivedMessage) -> Value {
    let mut attributes = json!({
        "ApproximateReceiveCount": message.receive_count.to_string(),
        "SentTimestamp": message.sent_timestamp.to_string(),
    });
    if let Some(first) = message.first_receive_timestamp {
        attributes["ApproximateFirstReceiveTimestamp"] = Value::String(first.to_string());
    }
    json!({
        "MessageId": message.message_id,
        "ReceiptHandle": message.receipt_handle,
        "MD5OfBody": message.md5_of_body,
        "Body": String::from_utf8_lossy(&message.body),
        "Attributes": attributes,
        "MessageAttributes": message.attributes,
    })
}

fn failures(failed: &[BatchFailure]) -> Vec<Value> {
    failed
        .iter()
        .map(|f| {
            json!({
                "Id": f.id,
                "Code": f.code.as_str(),
                "Message": f.message,
                "SenderFault": f.sender_fault,
            })
        })
        .collect()
}

fn json_response(status: StatusCode, body: String, request_id: &RequestId) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE),
    );
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn error_response(error: HqsError, request_id: &RequestId) -> Response {
    let error = error.with_request_id(request_id.as_str());
    let status =
        StatusCode::from_u16(error.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(code = error.code.as_str(), message = %error.message, "HQS request failed");
    }
    json_response(status, error.to_json(), request_id)
}
