use std::{
    any::Any,
    backtrace::Backtrace,
    cell::RefCell,
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::Once,
};

use futures::FutureExt;
use log::error;
use thiserror::Error;

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = RefCell::new(None);
}

static BACKTRACE_HOOK: Once = Once::new();

#[derive(Debug, Error)]
#[error("Mutation panicked: {message}")]
pub struct PanicRecovered {
    pub message: String,
    pub backtrace: String,
}

/// Polls `future` to completion, turning a panic raised while polling into
/// [`PanicRecovered`]. The panic's backtrace is logged.
pub async fn catch_panic<F: Future>(future: F) -> Result<F::Output, PanicRecovered> {
    install_backtrace_hook();

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(payload) => {
            let recovered = PanicRecovered {
                message: panic_message(payload.as_ref()),
                backtrace: LAST_BACKTRACE
                    .with(|slot| slot.borrow_mut().take())
                    .unwrap_or_default(),
            };

            error!("{recovered}\n{}", recovered.backtrace);

            Err(recovered)
        }
    }
}

// The payload handed to catch_unwind carries no trace, so it's captured on
// the panicking thread while the hook runs.
fn install_backtrace_hook() {
    BACKTRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();

        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}
