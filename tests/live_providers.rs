use std::{env, sync::Once};

use rustydocs::completion::{ChatMessage, CompletionRequest, get_completion_client};
use rustydocs::{config, embedding};

static INIT: Once = Once::new();

fn set_default_env(key: &str, value: &str) {
    let needs_value = env::var(key).map(|v| v.trim().is_empty()).unwrap_or(true);
    if needs_value {
        // SAFETY: Tests run serially via Once and we intentionally mutate process env.
        unsafe {
            env::set_var(key, value);
        }
    }
}

fn init_config_once() {
    INIT.call_once(|| {
        set_default_env("EMBEDDING_PROVIDER", "ollama");
        set_default_env("EMBEDDING_MODEL", "nomic-embed-text");
        set_default_env("EMBEDDING_DIMENSION", "768");
        set_default_env("OLLAMA_URL", "http://127.0.0.1:11434");
        set_default_env("COMPLETION_PROVIDER", "ollama");
        set_default_env("COMPLETION_MODEL", "llama3.2");
        config::init_config();
    });
}

#[tokio::test]
#[ignore = "Requires live Ollama embeddings"]
async fn live_embedding_roundtrip() {
    init_config_once();
    let config = config::get_config();
    let client = embedding::get_embedding_client(config).expect("embedding client");
    let vectors = client
        .generate_embeddings(vec!["Revenue was $5M in 2023".to_string()])
        .await
        .expect("failed to request embeddings from provider");
    assert_eq!(vectors.len(), 1, "expected one embedding per input");
    assert_eq!(
        vectors[0].len(),
        config.embedding_dimension,
        "embedding dimension mismatch"
    );
}

#[tokio::test]
#[ignore = "Requires live chat completion provider"]
async fn live_completion_answers_from_context() {
    init_config_once();
    let config = config::get_config();
    let client = get_completion_client(config).expect("completion client");
    let answer = client
        .complete(CompletionRequest {
            model: config.completion_model.clone(),
            messages: vec![
                ChatMessage::system(
                    "Answer using the context below.\n\nContext:\n[1] [Page 2] Revenue was $5M in 2023",
                ),
                ChatMessage::user("What was revenue in 2023?"),
            ],
            temperature: 0.0,
        })
        .await
        .expect("completion");
    assert!(answer.contains('5'), "unexpected answer: {answer}");
}
