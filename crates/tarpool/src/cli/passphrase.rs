use std::fs;
use std::path::PathBuf;

use age::secrecy::SecretString;
use clap::Parser;
use dialoguer::Password;
use miette::{Context as _, IntoDiagnostic as _, Result};

/// Clap arguments for passphrases.
#[derive(Debug, Clone, Parser)]
pub struct PassphraseArgs {
	/// Path to a file containing a passphrase.
	///
	/// The contents of the file will be trimmed of whitespace.
	#[arg(short = 'P', long)]
	pub passphrase_path: Option<PathBuf>,

	/// A passphrase as a string.
	///
	/// This leaves the passphrase in your shell history and in the process
	/// list; prefer `--passphrase-path` or the interactive prompt wherever
	/// possible.
	#[arg(long, conflicts_with = "passphrase_path")]
	pub insecure_passphrase: Option<SecretString>,
}

impl PassphraseArgs {
	/// Whether any argument supplies a passphrase without prompting.
	pub fn provided(&self) -> bool {
		self.passphrase_path.is_some() || self.insecure_passphrase.is_some()
	}

	/// Retrieve the passphrase, prompting interactively when no argument
	/// provides one.
	pub fn require_phrase(&self) -> Result<SecretString> {
		self.get(false)
	}

	/// Same, but the prompt asks twice. For backups, where a typo is
	/// unrecoverable.
	pub fn require_phrase_with_confirmation(&self) -> Result<SecretString> {
		self.get(true)
	}

	fn get(&self, confirm: bool) -> Result<SecretString> {
		if let Some(ref phrase) = self.insecure_passphrase {
			Ok(phrase.clone())
		} else if let Some(ref path) = self.passphrase_path {
			Ok(fs::read_to_string(path)
				.into_diagnostic()
				.wrap_err("reading passphrase file")?
				.trim()
				.into())
		} else {
			let mut prompt = Password::new().with_prompt("Passphrase");
			if confirm {
				prompt = prompt.with_confirmation("Confirm passphrase", "Passphrases do not match");
			}
			let phrase = prompt.interact().into_diagnostic()?;
			Ok(phrase.into())
		}
	}
}
