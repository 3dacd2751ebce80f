use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::analyzer::Analyzer;
use crate::analyzer::survey::{SurveyBuilder, SurveyEvent, SurveyStats};
use crate::logfile::LogReader;

/// Surveys a log on a background thread while it is being played.
///
/// Results arrive over a channel and are collected with
/// [`Scanner::try_events`] or [`Scanner::wait`].
pub struct Scanner {
    events: Receiver<SurveyEvent>,
    abort: Arc<AtomicBool>,
    stats: Arc<Mutex<SurveyStats>>,
    handle: Option<JoinHandle<()>>,
    finished: bool,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("finished", &self.finished)
            .finish()
    }
}

impl Scanner {
    pub fn spawn(path: PathBuf) -> Scanner {
        let (tx, rx) = mpsc::channel();
        let abort = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(SurveyStats::new()));

        let thread_abort = abort.clone();
        let thread_stats = stats.clone();
        let handle = thread::spawn(move || {
            let mut reader = match LogReader::open(&path) {
                Ok(reader) => reader,
                Err(e) => {
                    error!("survey could not open {path:?}: {e}");
                    return;
                }
            };
            let mut survey = SurveyBuilder::new(thread_stats).events(tx).build();
            loop {
                if thread_abort.load(Ordering::Relaxed) {
                    debug!("survey of {path:?} aborted");
                    return;
                }
                match reader.next_record() {
                    Ok(Some(record)) => survey.process(&record),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("survey stopped reading {path:?}: {e}");
                        break;
                    }
                }
            }
            survey.finish();
        });

        Scanner {
            events: rx,
            abort,
            stats,
            handle: Some(handle),
            finished: false,
        }
    }

    /// Events produced since the last call, without blocking.
    pub fn try_events(&mut self) -> Vec<SurveyEvent> {
        let events: Vec<_> = self.events.try_iter().collect();
        self.note_finished(&events);
        events
    }

    /// Blocks until the survey ends and returns the remaining events.
    pub fn wait(&mut self) -> Vec<SurveyEvent> {
        let events: Vec<_> = self.events.iter().collect();
        self.finished = true;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("survey thread panicked");
            }
        }
        events
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Copy of everything found so far.
    pub fn stats(&self) -> SurveyStats {
        self.stats.lock().clone()
    }

    /// Asks the thread to stop after the record it is reading.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    fn note_finished(&mut self, events: &[SurveyEvent]) {
        if events
            .iter()
            .any(|e| matches!(e, SurveyEvent::Finished { .. }))
        {
            self.finished = true;
        }
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        // The thread may be blocked in I/O; it exits on its own once it sees
        // the flag.
        self.abort();
    }
}
