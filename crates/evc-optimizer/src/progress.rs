//! Progress reporting for long searches.
//!
//! Reporters are purely observational: they never see probe evaluations and
//! nothing in a search depends on them.

use std::io::Write;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

/// Receives search progress notifications.
pub trait ProgressReporter: Send {
    fn on_start(&mut self, _owner: &str, _total: Option<usize>) {}

    fn on_iteration(&mut self, iteration: usize, value: f64);

    fn on_finish(&mut self, _iterations: usize) {}
}

/// Prints one marker character per `rate` samples.
///
/// For search spaces of more than a couple hundred samples the rate is
/// `10^(log10(total) - 2)`, i.e. roughly a hundred markers per search.
pub struct DotProgress<W: Write + Send> {
    writer: W,
    marker: char,
    rate: usize,
    count: usize,
}

impl DotProgress<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> DotProgress<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            marker: '.',
            rate: 1,
            count: 0,
        }
    }

    pub fn with_marker(mut self, marker: char) -> Self {
        self.marker = marker;
        self
    }

    pub fn rate(&self) -> usize {
        self.rate
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn rate_for(total: usize) -> usize {
        if total == 0 {
            return 1;
        }
        let rate = 10f64.powf((total as f64).log10() - 2.0);
        // Truncate, tolerating powf landing just below an exact power of ten.
        ((rate + 1e-9) as usize).max(1)
    }
}

impl<W: Write + Send> ProgressReporter for DotProgress<W> {
    fn on_start(&mut self, owner: &str, total: Option<usize>) {
        self.count = 0;
        self.rate = total.map(Self::rate_for).unwrap_or(1);
        let per = if self.rate > 1 {
            format!("{} ", self.rate)
        } else {
            String::new()
        };
        let size = total.map_or_else(|| "an unknown number of".to_string(), |t| t.to_string());
        // Best-effort: progress output must never fail a search.
        let _ = writeln!(
            self.writer,
            "\n{owner} executing optimization process (one {:?} for each {per}of {size} samples): ",
            self.marker
        );
    }

    fn on_iteration(&mut self, _iteration: usize, _value: f64) {
        if self.count % self.rate == 0 {
            let _ = write!(self.writer, "{}", self.marker);
            let _ = self.writer.flush();
        }
        self.count += 1;
    }

    fn on_finish(&mut self, _iterations: usize) {
        let _ = writeln!(self.writer);
    }
}

/// Progress notification sent over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    Started { owner: String, total: Option<usize> },
    Iteration { iteration: usize, value: f64 },
    Finished { iterations: usize },
}

/// Forwards progress to a channel, e.g. for a UI thread.
pub struct ChannelProgress {
    tx: Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    fn emit(&self, event: ProgressEvent) {
        // Best-effort send; a dropped receiver just stops the feed.
        let _ = self.tx.try_send(event);
    }
}

impl ProgressReporter for ChannelProgress {
    fn on_start(&mut self, owner: &str, total: Option<usize>) {
        self.emit(ProgressEvent::Started {
            owner: owner.to_string(),
            total,
        });
    }

    fn on_iteration(&mut self, iteration: usize, value: f64) {
        self.emit(ProgressEvent::Iteration { iteration, value });
    }

    fn on_finish(&mut self, iterations: usize) {
        self.emit(ProgressEvent::Finished { iterations });
    }
}
