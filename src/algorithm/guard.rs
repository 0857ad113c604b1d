//! Panic capture at executor boundaries.
//!
//! A unit that panics must not take its executor down with it. Sequential
//! steps and parallel branches run their unit through [`catch_panic`], which
//! turns the panic into [`Error::Panicked`].

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use crate::{Error, Result};

/// Await `fut`, converting a panic raised while polling it into an error.
pub async fn catch_panic<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Render a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
