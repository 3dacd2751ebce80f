use crate::logfile::LogRecord;

/// A consumer of every record of a log, in order.
pub trait Analyzer {
    fn process(&mut self, record: &LogRecord);
    fn finish(&mut self);
}
