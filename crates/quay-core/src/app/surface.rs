//! Request surface - メソッドとパスを `QueueService` に振り分ける
//!
//! クエリの値はパーセントデコードしてから使います。
//!
//! # ルート
//! - `POST   /queues`                                   create (201)
//! - `GET    /queues?cursor=`                           list (200)
//! - `GET    /queues/{id}`                              metadata (200)
//! - `DELETE /queues/{id}`                              delete (200)
//! - `GET    /queues/{id}/stats`                        counts (200)
//! - `GET    /queues/{id}/messages?limit=&visibility_timeout=`  lease (200)
//! - `POST   /queues/{id}/messages`                     enqueue (202)
//! - `DELETE /queues/{id}/messages/{message_id}?pop_receipt=`   acknowledge (200)

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::domain::{NewQueue, QueueError, QueueResult};

use super::service::QueueService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: Method,
    /// `?key=value&...` のクエリを含みうるパス
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn json(status: u16, body: impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(err) => Self::failure(&QueueError::Store(err.into())),
        }
    }

    fn ok() -> Self {
        Self {
            status: 200,
            body: Value::String("OK".to_string()),
        }
    }

    fn not_found(path: &str) -> Self {
        Self {
            status: 404,
            body: json!({ "error": format!("no route for {path}") }),
        }
    }

    fn failure(err: &QueueError) -> Self {
        let status = err.status_code();
        if status >= 500 {
            error!(error = %err, "request failed");
        }
        Self {
            status,
            body: json!({ "error": err.to_string() }),
        }
    }

    fn from_result<T: Serialize>(status: u16, result: QueueResult<T>) -> Self {
        match result {
            Ok(body) => Self::json(status, body),
            Err(err) => Self::failure(&err),
        }
    }

    fn from_unit(result: QueueResult<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(err) => Self::failure(&err),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnqueueBody {
    message_body: Option<String>,
}

#[derive(Debug, Serialize)]
struct LeaseBody<T> {
    messages: T,
}

/// `application/x-www-form-urlencoded` のクエリ
struct Query(HashMap<String, String>);

impl Query {
    fn parse(raw: Option<&str>) -> Self {
        let pairs = form_urlencoded::parse(raw.unwrap_or_default().as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()));
        Query(pairs.collect())
    }

    /// 存在して空でない値
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    fn parsed<T: FromStr>(&self, key: &str) -> QueueResult<Option<T>> {
        self.get(key)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| QueueError::invalid(format!("invalid {key}: {raw:?}")))
            })
            .transpose()
    }
}

/// リクエスト 1 つをサービスに渡し、結果をレスポンスにする
pub async fn dispatch(service: &QueueService, request: ApiRequest) -> ApiResponse {
    let (path, query) = match request.path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (request.path.as_str(), None),
    };
    let query = Query::parse(query);
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let response = match (request.method, segments.as_slice()) {
        (Method::Post, ["queues"]) => create(service, request.body).await,
        (Method::Get, ["queues"]) => {
            ApiResponse::from_result(200, service.list_queues(query.get("cursor")).await)
        }
        (Method::Get, ["queues", id]) => ApiResponse::from_result(200, service.get_queue(id).await),
        (Method::Delete, ["queues", id]) => ApiResponse::from_unit(service.delete_queue(id).await),
        (Method::Get, ["queues", id, "stats"]) => {
            ApiResponse::from_result(200, service.stats(id).await)
        }
        (Method::Get, ["queues", id, "messages"]) => lease(service, id, &query).await,
        (Method::Post, ["queues", id, "messages"]) => enqueue(service, id, request.body).await,
        (Method::Delete, ["queues", id, "messages", message_id]) => ApiResponse::from_unit(
            service
                .acknowledge(id, message_id, query.get("pop_receipt"))
                .await,
        ),
        (_, ["queues", id, ..]) if !id.is_empty() => {
            ApiResponse::failure(&QueueError::invalid(format!(
                "unsupported request {:?} {path}",
                request.method
            )))
        }
        _ => ApiResponse::not_found(path),
    };

    debug!(method = ?request.method, path = %request.path, status = response.status, "dispatched");
    response
}

async fn create(service: &QueueService, body: Option<Value>) -> ApiResponse {
    let request = match body {
        None | Some(Value::Null) => NewQueue::default(),
        Some(body) => match serde_json::from_value::<NewQueue>(body) {
            Ok(request) => request,
            Err(err) => {
                return ApiResponse::failure(&QueueError::invalid(format!(
                    "malformed queue body: {err}"
                )));
            }
        },
    };
    ApiResponse::from_result(201, service.create_queue(request).await)
}

async fn enqueue(service: &QueueService, queue_id: &str, body: Option<Value>) -> ApiResponse {
    let body = body
        .map(serde_json::from_value::<EnqueueBody>)
        .transpose()
        .map_err(|err| QueueError::invalid(format!("malformed message body: {err}")))
        .and_then(|body| {
            body.and_then(|b| b.message_body)
                .ok_or_else(|| QueueError::invalid("message_body is required"))
        });

    match body {
        Ok(body) => ApiResponse::from_result(202, service.enqueue(queue_id, body).await),
        Err(err) => ApiResponse::failure(&err),
    }
}

async fn lease(service: &QueueService, queue_id: &str, query: &Query) -> ApiResponse {
    let params = query
        .parsed::<usize>("limit")
        .and_then(|limit| Ok((limit, query.parsed::<u64>("visibility_timeout")?)));

    let result = match params {
        Ok((limit, visibility_timeout)) => {
            service.lease(queue_id, limit, visibility_timeout).await
        }
        Err(err) => Err(err),
    };
    ApiResponse::from_result(200, result.map(|messages| LeaseBody { messages }))
}
