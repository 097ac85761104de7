use crossbeam::channel::{Receiver, Sender, unbounded};
use log::{Level, LevelFilter, Metadata, Record};

#[derive(Debug)]
pub struct LogMessage {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// Ships log records over a channel so one thread owns the output.
pub struct ChannelLogger {
    sender: Sender<LogMessage>,
    level: LevelFilter,
}

impl log::Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = self.sender.try_send(LogMessage {
                level: record.metadata().level(),
                target: record.target().to_owned(),
                message: format!("{}", record.args()),
            });
        }
    }

    fn flush(&self) {}
}

impl ChannelLogger {
    pub fn new(sender: Sender<LogMessage>, level: LevelFilter) -> Self {
        Self { sender, level }
    }

    pub fn with_receiver(level: LevelFilter) -> (Self, Receiver<LogMessage>) {
        let (sender, receiver) = unbounded();
        (Self::new(sender, level), receiver)
    }

    /// Installs the logger globally and returns the receiving end.
    pub fn install(level: LevelFilter) -> Result<Receiver<LogMessage>, log::SetLoggerError> {
        let (logger, receiver) = Self::with_receiver(level);
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(level);
        Ok(receiver)
    }
}

/// Prints everything logged so far.
pub fn drain(receiver: &Receiver<LogMessage>) {
    for message in receiver.try_iter() {
        println!("  [{:<5} {}] {}", message.level, message.target, message.message);
    }
}

#[cfg(test)]
mod tests {
    use log::Log;

    use super::*;

    #[test]
    fn forwards_enabled_records() {
        let (logger, receiver) = ChannelLogger::with_receiver(LevelFilter::Info);

        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .target("switchyard::route")
                .args(format_args!("delivery failed"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .args(format_args!("too chatty"))
                .build(),
        );

        let messages: Vec<_> = receiver.try_iter().collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].level, Level::Warn);
        assert_eq!(messages[0].target, "switchyard::route");
        assert_eq!(messages[0].message, "delivery failed");
    }
}
