use std::sync::mpsc::{self, Receiver, Sender};

/// One message on the progress channel.
///
/// On the wire every event is a single fixed-width unsigned 64-bit integer.
/// The first two words of a backup stream are the file count and the total
/// size, in that order; every later word is either a positive byte delta or
/// zero, which counts one completed file. Restore streams carry byte deltas
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
	/// Number of regular files the backup will store. Always first.
	FileCount(u64),
	/// Total regular-file bytes the backup will store. Always second.
	TotalSize(u64),
	/// Bytes appended since the last event. Always positive.
	DeltaBytes(u64),
	/// One regular file finished; the zero word on the wire.
	FileCompleted,
}

impl ProgressEvent {
	/// The 64-bit wire form of this event.
	pub fn to_wire(self) -> u64 {
		match self {
			Self::FileCount(n) | Self::TotalSize(n) | Self::DeltaBytes(n) => n,
			Self::FileCompleted => 0,
		}
	}

	/// The 8-byte little-endian wire form, for external pipe consumers.
	pub fn to_wire_bytes(self) -> [u8; 8] {
		self.to_wire().to_le_bytes()
	}
}

/// Positional decoder for the wire form.
///
/// The meaning of a word depends only on how many words came before it, so
/// the decoder is a counter.
#[derive(Debug, Default)]
pub struct ProgressDecoder {
	seen: u64,
}

impl ProgressDecoder {
	/// Decoder for a backup stream (two header words first).
	pub fn new() -> Self {
		Self::default()
	}

	/// Decoder for a restore stream, which has no header words.
	pub fn headerless() -> Self {
		Self { seen: 2 }
	}

	pub fn decode(&mut self, word: u64) -> ProgressEvent {
		let event = match self.seen {
			0 => ProgressEvent::FileCount(word),
			1 => ProgressEvent::TotalSize(word),
			_ if word == 0 => ProgressEvent::FileCompleted,
			_ => ProgressEvent::DeltaBytes(word),
		};
		self.seen += 1;
		event
	}
}

/// Worker-side handle on the progress channel.
///
/// Sends never block and never fail: a consumer that has gone away ends the
/// run's reporting, not the run.
#[derive(Debug, Clone)]
pub struct ProgressSink {
	tx: Sender<ProgressEvent>,
}

impl ProgressSink {
	pub fn send(&self, event: ProgressEvent) {
		let _ = self.tx.send(event);
	}

	/// Report appended bytes. Zero-byte files produce no delta, since zero
	/// is the file-completed word on the wire.
	pub fn delta(&self, bytes: u64) {
		if bytes > 0 {
			self.send(ProgressEvent::DeltaBytes(bytes));
		}
	}

	pub fn file_completed(&self) {
		self.send(ProgressEvent::FileCompleted);
	}
}

/// Create the progress channel: the sink goes to the engine, the receiver to
/// whoever renders progress.
pub fn progress_channel() -> (ProgressSink, Receiver<ProgressEvent>) {
	let (tx, rx) = mpsc::channel();
	(ProgressSink { tx }, rx)
}

/// Consumer-side aggregation of a progress stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressTotals {
	/// File count announced by the first header word.
	pub expected_files: u64,
	/// Byte total announced by the second header word.
	pub expected_bytes: u64,
	/// Bytes reported so far.
	pub bytes: u64,
	/// Files completed so far.
	pub files: u64,
}

impl ProgressTotals {
	pub fn apply(&mut self, event: ProgressEvent) {
		match event {
			ProgressEvent::FileCount(n) => self.expected_files = n,
			ProgressEvent::TotalSize(n) => self.expected_bytes = n,
			ProgressEvent::DeltaBytes(n) => self.bytes += n,
			ProgressEvent::FileCompleted => self.files += 1,
		}
	}
}
