use std::io::{stderr, IsTerminal as _};

use indicatif::{ProgressBar, ProgressStyle};

/// Implementation of the `backup` command.
pub mod backup;

/// Passphrase arguments shared by the commands.
pub mod passphrase;

/// Implementation of the `restore` command.
pub mod restore;

/// Implementation of the `size` command.
pub mod size;

/// A byte-denominated progress bar on stderr iff that's a terminal, and
/// nothing otherwise.
pub(crate) fn byte_bar() -> ProgressBar {
	if stderr().is_terminal() {
		let style = ProgressStyle::default_bar()
			.template("[{bar:.green/blue}] {wide_msg} {binary_bytes}/{binary_total_bytes} ({eta})")
			.expect("BUG: progress bar template invalid");
		ProgressBar::new(0).with_style(style)
	} else {
		ProgressBar::hidden()
	}
}
