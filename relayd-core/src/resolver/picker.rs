//! First-non-error-wins racing combinator over a set of futures, with the
//! losers cancelled as soon as a winner is found.
use futures::stream::FuturesUnordered;
use futures::StreamExt;

/// Polls every future in `tasks` concurrently and returns the first `Ok`.
/// If all fail, returns the first error encountered (in completion order).
pub async fn race<F, T, E>(tasks: Vec<F>) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let mut pending: FuturesUnordered<F> = tasks.into_iter().collect();
    let mut first_error = None;

    while let Some(result) = pending.next().await {
        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    Err(first_error.expect("race called with no tasks"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_first_success() {
        let tasks: Vec<_> = vec![
            Box::pin(async { Err::<i32, &str>("slow failure") }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<i32, &str>>>>,
            Box::pin(async { Ok::<i32, &str>(7) }),
        ];
        let result = race(tasks).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn returns_first_error_when_all_fail() {
        let tasks: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = Result<i32, &str>>>>> = vec![
            Box::pin(async { Err("a") }),
            Box::pin(async { Err("b") }),
        ];
        let result = race(tasks).await;
        assert!(result.is_err());
    }
}
