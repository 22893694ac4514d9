//! Повторы запросов к облачным провайдерам
//!
//! Повторяются ответы 429, ответы 5xx и транспортные ошибки. Задержка растет
//! как `base * 2^n`, заголовок `Retry-After` (в секундах) имеет приоритет.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};

use crate::config::RetryPolicy;
use crate::error::TurnError;
use crate::types::Provider;

/// Нужно ли повторить запрос с таким кодом ответа
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Разобрать `Retry-After`, заданный числом секунд
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Задержка перед повтором номер `attempt` (с нуля)
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let max = Duration::from_millis(policy.max_delay_ms);
    let delay = retry_after.unwrap_or_else(|| {
        let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
        Duration::from_millis(policy.base_delay_ms.saturating_mul(factor))
    });
    delay.min(max)
}

async fn error_body(response: Response) -> String {
    match response.text().await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => "<empty body>".to_string(),
        Err(e) => format!("Failed to read error response: {}", e),
    }
}

/// Отправить запрос, повторяя его по политике `policy`
///
/// `make_request` вызывается заново на каждой попытке. Возвращает успешный
/// ответ или `TurnError::Synthesis` с причиной последней неудачи.
pub async fn send_with_retry<F, Fut>(
    provider: Provider,
    policy: &RetryPolicy,
    mut make_request: F,
) -> Result<Response, TurnError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reqwest::Result<Response>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_reason = String::new();

    for attempt in 0..attempts {
        let hint = match make_request().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let hint = retry_after(response.headers());
                let body = error_body(response).await;
                last_reason = format!("status {}: {}", status, body);
                if !is_retryable_status(status) {
                    log::error!("{} request rejected ({})", provider, last_reason);
                    return Err(TurnError::synthesis(provider, last_reason));
                }
                hint
            }
            Err(e) => {
                last_reason = format!("transport error: {}", e);
                None
            }
        };

        if attempt + 1 < attempts {
            let delay = backoff_delay(policy, attempt, hint);
            log::warn!(
                "{} request failed ({}), retrying in {:.1}s (attempt {}/{})",
                provider,
                last_reason,
                delay.as_secs_f64(),
                attempt + 1,
                attempts
            );
            tokio::time::sleep(delay).await;
        }
    }

    log::error!("{} request failed after {} attempts: {}", provider, attempts, last_reason);
    Err(TurnError::synthesis(
        provider,
        format!("{} after {} attempts", last_reason, attempts),
    ))
}
