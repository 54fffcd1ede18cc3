use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use core_api::ai::{AiRequest, DispatchError, Dispatcher, InputType};
use core_api::error::Error;
use core_api::http::{HttpClient, USER_AGENT};
use core_api::llm::{LlmClient, Provider};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

fn http(attempts: u32) -> HttpClient {
    HttpClient::builder(USER_AGENT)
        .timeout(Duration::from_secs(5))
        .retries(attempts, Duration::from_millis(10))
        .build()
        .unwrap()
}

fn client(provider: Provider, model: &str, base_url: &str, attempts: u32) -> LlmClient {
    LlmClient::new(
        provider,
        "test-key".into(),
        model.into(),
        Some(base_url.into()),
        http(attempts),
    )
}

fn request(model: &str) -> AiRequest {
    AiRequest {
        text: "Какой тариф?".into(),
        combined_context: "ctx".into(),
        chat_history: "".into(),
        input_type: InputType::Text,
        model: model.into(),
    }
}

/// Chat Completions endpoint that fails `failures` times, then answers.
async fn flaky_chat(failures: usize, status: StatusCode) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/chat/completions",
            post(
                move |State(hits): State<Arc<AtomicUsize>>, Json(body): Json<Value>| async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        return (status, Json(json!({"error": "unavailable"})));
                    }
                    let model = body["model"].as_str().unwrap_or_default().to_string();
                    (
                        StatusCode::OK,
                        Json(json!({"choices": [{"message": {"content": format!("answer from {model}")}}]})),
                    )
                },
            ),
        )
        .with_state(hits.clone());
    (spawn(app).await, hits)
}

#[tokio::test]
async fn requested_model_answers_without_notice() {
    let (url, _) = flaky_chat(0, StatusCode::OK).await;
    let dispatcher = Dispatcher::new(
        vec![client(Provider::Mistral, "mistral-large-latest", &url, 1)],
        vec!["mistral-large-latest".into()],
    );
    let answer = dispatcher.answer(&request("mistral-large-latest")).await.unwrap();
    assert_eq!(answer, "answer from mistral-large-latest");
}

#[tokio::test]
async fn transient_errors_are_retried_on_the_same_model() {
    let (url, hits) = flaky_chat(2, StatusCode::SERVICE_UNAVAILABLE).await;
    let dispatcher = Dispatcher::new(
        vec![client(Provider::Mistral, "mistral-large-latest", &url, 3)],
        vec!["mistral-large-latest".into()],
    );
    let answer = dispatcher.answer(&request("mistral-large-latest")).await.unwrap();
    assert_eq!(answer, "answer from mistral-large-latest");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let (url, hits) = flaky_chat(usize::MAX, StatusCode::UNAUTHORIZED).await;
    let dispatcher = Dispatcher::new(
        vec![client(Provider::Mistral, "mistral-large-latest", &url, 3)],
        vec!["mistral-large-latest".into()],
    );
    let err = dispatcher
        .answer(&request("mistral-large-latest"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::AllModelsFailed { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fallback_model_answer_carries_notice() {
    let (broken, _) = flaky_chat(usize::MAX, StatusCode::INTERNAL_SERVER_ERROR).await;
    let responses = spawn(Router::new().route(
        "/responses",
        post(|Json(body): Json<Value>| async move {
            let input = body["input"].as_str().unwrap_or_default();
            assert!(input.contains("\n\nЗапрос: Какой тариф?"));
            Json(json!({"output": [{"type": "message", "content": [{"type": "output_text", "text": "ok"}]}]}))
        }),
    ))
    .await;

    let dispatcher = Dispatcher::new(
        vec![
            client(Provider::Mistral, "mistral-large-latest", &broken, 1),
            client(Provider::OpenAi, "gpt-4o-mini", &responses, 1),
        ],
        vec!["mistral-large-latest".into(), "gpt-4o-mini".into()],
    );
    let answer = dispatcher.answer(&request("mistral-large-latest")).await.unwrap();
    assert_eq!(
        answer,
        "<i>⚠️ Используется модель gpt-4o-mini, так как mistral-large-latest недоступна</i>\n\nok"
    );
}

#[tokio::test]
async fn missing_key_moves_to_next_model() {
    let (url, hits) = flaky_chat(0, StatusCode::OK).await;
    let keyless = LlmClient::new(
        Provider::OpenRouter,
        String::new(),
        "deepseek/deepseek-chat-v3-0324:free".into(),
        Some(url.clone()),
        http(1),
    );
    let dispatcher = Dispatcher::new(
        vec![keyless, client(Provider::Mistral, "mistral-large-latest", &url, 1)],
        vec![
            "mistral-large-latest".into(),
            "deepseek/deepseek-chat-v3-0324:free".into(),
        ],
    );
    let answer = dispatcher
        .answer(&request("deepseek/deepseek-chat-v3-0324:free"))
        .await
        .unwrap();
    assert!(answer.ends_with("answer from mistral-large-latest"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_model_is_rejected_before_any_call() {
    let (url, hits) = flaky_chat(0, StatusCode::OK).await;
    let dispatcher = Dispatcher::new(
        vec![client(Provider::Mistral, "mistral-large-latest", &url, 1)],
        vec!["mistral-large-latest".into()],
    );
    let err = dispatcher.answer(&request("gpt-5")).await.unwrap_err();
    assert_eq!(err.to_string(), "Model 'gpt-5' is not supported");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rate_limit_is_retried_and_keeps_retry_after() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/chat/completions",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down")
            }),
        )
        .with_state(hits.clone());
    let url = spawn(app).await;

    let err = http(2)
        .post_json_authed(&format!("{url}/chat/completions"), "{}", "test-key")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::RateLimit {
            retry_after_secs: Some(7),
            ..
        }
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
