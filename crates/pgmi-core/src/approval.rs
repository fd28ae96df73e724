//! Confirmation before a destructive database overwrite.
//!
//! Neither approver performs the overwrite; they only decide whether it may
//! happen. `Ok(false)` is a refusal, `Err(Error::Cancelled)` a cancellation.

use std::io::{self, BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::cancel::{cancelled_error, CancelToken};
use crate::error::Error;

pub const DEFAULT_COUNTDOWN: u32 = 5;
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

type Output = Mutex<Box<dyn Write + Send>>;
type TickHook = Arc<dyn Fn(u32) + Send + Sync>;

pub enum Approver {
    Forced(ForcedApprover),
    Interactive(InteractiveApprover),
}

impl Approver {
    pub async fn request_approval(&self, database: &str, cancel: &CancelToken) -> Result<bool, Error> {
        match self {
            Approver::Forced(a) => a.request_approval(database, cancel).await,
            Approver::Interactive(a) => a.request_approval(database, cancel).await,
        }
    }
}

fn emit(output: &Output, text: &str) {
    if let Ok(mut out) = output.lock() {
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

/// Prints a warning and counts down; approves when the countdown completes.
pub struct ForcedApprover {
    countdown: u32,
    tick: Duration,
    output: Output,
    on_tick: Option<TickHook>,
}

impl ForcedApprover {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stderr()))
    }

    pub fn with_output(output: Box<dyn Write + Send>) -> Self {
        Self {
            countdown: DEFAULT_COUNTDOWN,
            tick: DEFAULT_TICK,
            output: Mutex::new(output),
            on_tick: None,
        }
    }

    pub fn countdown(mut self, ticks: u32, tick: Duration) -> Self {
        self.countdown = ticks;
        self.tick = tick;
        self
    }

    /// Called with the remaining count at the start of every tick.
    pub fn on_tick(mut self, hook: TickHook) -> Self {
        self.on_tick = Some(hook);
        self
    }

    pub async fn request_approval(&self, database: &str, cancel: &CancelToken) -> Result<bool, Error> {
        emit(&self.output, &danger_banner(database));

        for remaining in (1..=self.countdown).rev() {
            cancel.check()?;
            if let Some(hook) = &self.on_tick {
                hook(remaining);
            }
            emit(
                &self.output,
                &format!(
                    "\rDropping in: {} seconds... (Press Ctrl+C to cancel)",
                    remaining
                ),
            );
            tokio::select! {
                biased;
                reason = cancel.cancelled() => {
                    emit(&self.output, "\n");
                    return Err(cancelled_error(reason));
                }
                _ = tokio::time::sleep(self.tick) => {}
            }
        }

        emit(
            &self.output,
            "\rProceeding with database overwrite...                              \n",
        );
        info!("Forced approval granted for {}", database);
        Ok(true)
    }
}

impl Default for ForcedApprover {
    fn default() -> Self {
        Self::new()
    }
}

fn danger_banner(database: &str) -> String {
    format!(
        "\n!!! DANGER !!!\n\
         Database '{db}' will be DROPPED and RECREATED.\n\
         All data in '{db}' will be permanently lost.\n\n",
        db = database
    )
}

/// Asks the user to type the database name.
pub struct InteractiveApprover {
    input: Arc<Mutex<Option<Box<dyn BufRead + Send>>>>,
    output: Output,
}

impl InteractiveApprover {
    pub fn stdin() -> Self {
        Self::new(Box::new(BufReader::new(io::stdin())), Box::new(io::stderr()))
    }

    pub fn new(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input: Arc::new(Mutex::new(Some(input))),
            output: Mutex::new(output),
        }
    }

    pub async fn request_approval(&self, database: &str, cancel: &CancelToken) -> Result<bool, Error> {
        emit(
            &self.output,
            &format!(
                "\nWARNING: You are about to DROP and RECREATE the database '{db}'\n\
                 This will permanently delete all data in this database!\n\n\
                 To confirm, type the database name '{db}' and press Enter: ",
                db = database
            ),
        );

        let input = Arc::clone(&self.input);
        let read = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut guard = input
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "input lock poisoned"))?;
            let reader = guard
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "input closed"))?;
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "end of input before a line was read",
                ));
            }
            Ok(line)
        });

        let line = tokio::select! {
            biased;
            reason = cancel.cancelled() => {
                emit(&self.output, "\n");
                return Err(cancelled_error(reason));
            }
            joined = read => joined
                .map_err(|e| Error::Other(format!("failed to read input: {}", e)))?
                .map_err(|e| Error::Other(format!("failed to read input: {}", e)))?,
        };

        let answer = line.trim();
        if answer == database {
            emit(&self.output, "Confirmed. Proceeding with database overwrite...\n");
            Ok(true)
        } else {
            debug!("Approval input did not match");
            emit(
                &self.output,
                &format!(
                    "Input '{}' does not match database name '{}'. Operation cancelled.\n",
                    answer, database
                ),
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelReason;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn interactive(input: &str) -> (InteractiveApprover, SharedBuffer) {
        let out = SharedBuffer::default();
        let approver = InteractiveApprover::new(
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            Box::new(out.clone()),
        );
        (approver, out)
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_approves_after_full_countdown() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let out = SharedBuffer::default();
        let approver = ForcedApprover::with_output(Box::new(out.clone())).on_tick(Arc::new(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let approved = approver
            .request_approval("staging", &CancelToken::new())
            .await
            .unwrap();
        assert!(approved);
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        let text = out.text();
        assert!(text.contains("DANGER"));
        assert!(text.contains("'staging'"));
        assert!(text.contains("Proceeding with database overwrite"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_cancel_on_second_tick() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let approver = ForcedApprover::with_output(Box::new(io::sink())).on_tick(Arc::new(
            move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                    trigger.cancel(CancelReason::Interrupted);
                }
            },
        ));

        let result = approver.request_approval("prod", &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_forced_already_cancelled_never_ticks() {
        let cancel = CancelToken::new();
        cancel.cancel(CancelReason::DeadlineExceeded);
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let approver = ForcedApprover::with_output(Box::new(io::sink())).on_tick(Arc::new(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));
        assert!(approver.request_approval("db", &cancel).await.is_err());
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_interactive_exact_match() {
        let (approver, out) = interactive("  myapp  \n");
        assert!(approver.request_approval("myapp", &CancelToken::new()).await.unwrap());
        assert!(out.text().contains("Confirmed"));
    }

    #[tokio::test]
    async fn test_interactive_mismatch_and_empty() {
        let (approver, out) = interactive("myap\n");
        assert!(!approver.request_approval("myapp", &CancelToken::new()).await.unwrap());
        assert!(out.text().contains("Input 'myap' does not match"));

        let (approver, _) = interactive("\n");
        assert!(!approver.request_approval("myapp", &CancelToken::new()).await.unwrap());

        let (approver, _) = interactive("MYAPP\n");
        assert!(!approver.request_approval("myapp", &CancelToken::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_interactive_read_failure() {
        let (approver, _) = interactive("");
        let err = approver
            .request_approval("myapp", &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to read input"));
    }

    #[tokio::test]
    async fn test_interactive_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel(CancelReason::Interrupted);
        let (approver, _) = interactive("myapp\n");
        let result = approver.request_approval("myapp", &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_approver_dispatch() {
        let (inner, _) = interactive("db\n");
        let approver = Approver::Interactive(inner);
        assert!(approver.request_approval("db", &CancelToken::new()).await.unwrap());
    }
}
