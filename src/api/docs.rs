//! Interactive API documentation and the OpenAPI document behind it.

use super::{ApiError, ApiResult};
use crate::error::Error;
use askama::Template;
use axum::Json;
use axum::response::Html;
use serde_json::{Value, json};

const TITLE: &str = "Core API";
const SPEC_URL: &str = "/openapi.json";

#[derive(Template)]
#[template(path = "docs.html")]
struct SwaggerPage<'a> {
    title: &'a str,
    spec_url: &'a str,
}

#[derive(Template)]
#[template(path = "redoc.html")]
struct RedocPage<'a> {
    title: &'a str,
    spec_url: &'a str,
}

fn render(page: &impl Template) -> ApiResult<Html<String>> {
    page.render()
        .map(Html)
        .map_err(|e| ApiError::from(Error::from(e)))
}

pub(super) async fn swagger_ui() -> ApiResult<Html<String>> {
    render(&SwaggerPage {
        title: TITLE,
        spec_url: SPEC_URL,
    })
}

pub(super) async fn redoc() -> ApiResult<Html<String>> {
    render(&RedocPage {
        title: TITLE,
        spec_url: SPEC_URL,
    })
}

fn query_param(name: &str) -> Value {
    json!({"name": name, "in": "query", "required": true, "schema": {"type": "string"}})
}

fn path_user_id() -> Value {
    json!({"name": "user_id", "in": "path", "required": true, "schema": {"type": "integer", "format": "int64"}})
}

fn body(schema: &str) -> Value {
    json!({"required": true, "content": {"application/json": {"schema": {"$ref": format!("#/components/schemas/{schema}")}}}})
}

fn ok(schema: Value) -> Value {
    json!({"200": {"description": "Successful Response", "content": {"application/json": {"schema": schema}}}})
}

fn schema_ref(name: &str) -> Value {
    json!({"$ref": format!("#/components/schemas/{name}")})
}

fn array_of(name: &str) -> Value {
    json!({"type": "array", "items": schema_ref(name)})
}

fn op(tag: &str, summary: &str, extra: Value, responses: Value) -> Value {
    let mut op = json!({"tags": [tag], "summary": summary, "responses": responses});
    if let (Some(op), Value::Object(extra)) = (op.as_object_mut(), extra) {
        op.extend(extra);
    }
    op
}

fn hashes_schema() -> Value {
    json!({"type": "object", "required": ["hashes"], "properties": {"hashes": {"type": "array", "items": {"type": "string"}}}})
}

fn schemas() -> Value {
    let string = json!({"type": "string"});
    let int = json!({"type": "integer", "format": "int64"});
    json!({
        "Address": {"type": "object", "required": ["id", "address", "territory_id", "territory_name"], "properties": {
            "id": int, "address": string, "territory_id": string, "territory_name": string,
            "conn_type": {"type": ["array", "null"], "items": {"type": "string"}}
        }},
        "AddressList": {"type": "object", "properties": {"addresses": array_of("Address")}},
        "UserData": {"type": "object", "required": ["user_id", "firstname"], "properties": {
            "user_id": int, "firstname": string,
            "lastname": {"type": "string", "default": ""}, "username": {"type": "string", "default": ""}
        }},
        "AuthResponse": {"type": "object", "properties": {
            "status": {"type": "string", "enum": ["created", "exists"]}, "message": string,
            "fio": {"type": ["string", "null"]}, "position": {"type": ["string", "null"]}
        }},
        "Admin": {"type": "object", "properties": {"user_id": int, "username": {"type": ["string", "null"]}}},
        "LogEntry": {"type": "object", "required": ["user_id", "query", "ai_response", "status"], "properties": {
            "user_id": int, "query": string, "ai_response": string,
            "status": {"type": "integer", "enum": [0, 1]},
            "hashes": {"type": "array", "items": string, "default": []},
            "category": {"type": "string", "default": ""}
        }},
        "HistoryEntry": {"type": "object", "properties": {
            "log_id": int, "user_id": int, "query": string, "response": string,
            "response_status": {"type": "boolean"}, "category": {"type": ["string", "null"]},
            "created_at": {"type": "string", "format": "date-time"}
        }},
        "NewTopic": {"type": "object", "required": ["hash", "title", "text", "user_id"], "properties": {
            "hash": string, "title": string, "text": string, "user_id": int
        }},
        "TopicText": {"type": "object", "properties": {
            "book_name": {"type": ["string", "null"]}, "text": {"type": ["string", "null"]}, "url": {"type": ["string", "null"]}
        }},
        "HashesRequest": hashes_schema(),
        "StatusResponse": {"type": "object", "properties": {"status": string}},
        "AiRequest": {"type": "object", "required": ["text", "combined_context", "chat_history"], "properties": {
            "text": string, "combined_context": string, "chat_history": string,
            "input_type": {"type": "string", "enum": ["voice", "csv", "text"], "default": "text"},
            "model": {"type": "string", "default": crate::ai::DEFAULT_MODEL}
        }},
        "AiResponse": {"type": "object", "properties": {"ai_response": string}}
    })
}

/// OpenAPI 3.1 description of every route.
pub fn openapi_document() -> Value {
    let any = json!({"type": "object"});
    json!({
        "openapi": "3.1.0",
        "info": {
            "title": TITLE,
            "description": "Redis lookups, Frida bot backend and AI requests",
            "version": env!("CARGO_PKG_VERSION")
        },
        "paths": {
            "/": {"get": op("service", "Service index", json!({}), ok(any.clone()))},
            "/health": {"get": op("service", "Liveness check", json!({}), ok(any.clone()))},
            "/health/ready": {"get": op("service", "Backend readiness", json!({}), ok(any.clone()))},
            "/all_users_from_redis": {"get": op("redis", "Download all users as JSON", json!({}), ok(json!({"type": "array", "items": any})))},
            "/redis_addresses": {"get": op("redis", "Search addresses", json!({"parameters": [query_param("query_address")]}), ok(schema_ref("AddressList")))},
            "/redis_address_by_id": {"get": op("redis", "Address by id", json!({"parameters": [query_param("address_id")]}), ok(schema_ref("Address")))},
            "/redis_tariffs": {"get": op("redis", "Tariffs of a territory", json!({"parameters": [query_param("territory_id")]}), ok(any.clone()))},
            "/v1/auth": {"post": op("frida", "Register an employee", json!({"requestBody": body("UserData")}), ok(schema_ref("AuthResponse")))},
            "/v1/admins": {"get": op("frida", "List administrators", json!({}), ok(array_of("Admin")))},
            "/v1/users/{user_id}/admin": {"get": op("frida", "Admin flag of a user", json!({"parameters": [path_user_id()]}), ok(any.clone()))},
            "/v1/log": {"post": op("frida", "Log a bot answer", json!({"requestBody": body("LogEntry")}), ok(schema_ref("StatusResponse")))},
            "/v1/history/{user_id}": {"get": op("frida", "Last messages of a user", json!({"parameters": [path_user_id()]}), ok(array_of("HistoryEntry")))},
            "/v1/topics": {"post": op("frida", "Add a knowledge-base topic", json!({"requestBody": body("NewTopic")}), ok(schema_ref("StatusResponse")))},
            "/v1/topics/count": {"get": op("frida", "Number of topics", json!({}), ok(any.clone()))},
            "/v1/topics/lookup": {"post": op("frida", "Topic texts by hash", json!({"requestBody": body("HashesRequest")}), ok(array_of("TopicText")))},
            "/v1/topics/delete": {"post": op("frida", "Delete topics by hash", json!({"requestBody": body("HashesRequest")}), ok(any.clone()))},
            "/v1/ai": {"post": op("ai", "Answer with the requested model", json!({"requestBody": body("AiRequest")}), ok(schema_ref("AiResponse")))}
        },
        "components": {
            "schemas": schemas(),
            "securitySchemes": {"bearer": {"type": "http", "scheme": "bearer"}}
        }
    })
}

pub(super) async fn openapi() -> Json<Value> {
    Json(openapi_document())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_schema_reference_resolves() {
        let doc = openapi_document();
        let text = doc.to_string();
        let schemas = doc["components"]["schemas"].as_object().unwrap();
        for part in text.split("#/components/schemas/").skip(1) {
            let name: String = part.chars().take_while(|c| c.is_alphanumeric()).collect();
            assert!(schemas.contains_key(&name), "dangling $ref {name}");
        }
    }

    #[test]
    fn pages_point_at_the_document() {
        let html = SwaggerPage {
            title: TITLE,
            spec_url: SPEC_URL,
        }
        .render()
        .unwrap();
        assert!(html.contains("/openapi.json"));
        assert!(RedocPage {
            title: TITLE,
            spec_url: SPEC_URL
        }
        .render()
        .unwrap()
        .contains("<redoc"));
    }
}
