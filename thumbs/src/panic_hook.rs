use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{PanicHookInfo, take_hook};
use std::thread;

use chrono::Local;

/// Installs a global panic hook that logs panics via `tracing` before
/// handing over to the previous hook.
pub fn install() {
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let panic_record = format_panic_record(panic_info);
            tracing::error!(target: "thumbs::panic", "{panic_record}");
        }));

        previous_hook(panic_info);
    }));
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = payload_to_string(panic_info.payload())
        .unwrap_or_else(|| panic_info.to_string());
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());

    let thread_name = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());

    let backtrace = Backtrace::capture();
    let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");

    format!(
        "{ts} PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{backtrace}"
    )
}

/// Message carried by a panic payload, for the two payload types `panic!`
/// produces.
pub fn payload_to_string(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return Some((*s).to_string());
    }
    payload.downcast_ref::<String>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(f: impl FnOnce() + std::panic::UnwindSafe) -> Box<dyn Any + Send> {
        std::panic::catch_unwind(f).unwrap_err()
    }

    #[test]
    fn extracts_static_and_formatted_messages() {
        let payload = payload_of(|| panic!("static message"));
        assert_eq!(payload_to_string(&*payload).as_deref(), Some("static message"));

        let id = 7;
        let payload = payload_of(move || panic!("formatted {id}"));
        assert_eq!(payload_to_string(&*payload).as_deref(), Some("formatted 7"));

        let payload = payload_of(|| std::panic::panic_any(42u8));
        assert_eq!(payload_to_string(&*payload), None);
    }
}
