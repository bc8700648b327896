use std::io::{self, Read, Write};

/// Frame markers around an archive sent over an external byte stream.
pub const STREAM_HEADER_MAGIC: [u8; 8] = *b"TPBSTRM\x01";
pub const STREAM_TRAILER_MAGIC: [u8; 8] = *b"TPBSTRM\x02";

/// Sanity cap on the archive name carried in the header.
const MAX_NAME_LEN: usize = 4096;

/// Out-of-band header written before the archive bytes.
///
/// The compression flag matters on restore: a stream cannot be probed by
/// seeking, so the reader pipeline is chosen from the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
	pub name: String,
	pub total_size: u64,
	pub compressed: bool,
}

pub fn write_stream_header<W: Write>(writer: &mut W, header: &StreamHeader) -> io::Result<()> {
	writer.write_all(&STREAM_HEADER_MAGIC)?;
	let name = header.name.as_bytes();
	writer.write_all(&(name.len() as u32).to_le_bytes())?;
	writer.write_all(name)?;
	writer.write_all(&header.total_size.to_le_bytes())?;
	writer.write_all(&[u8::from(header.compressed)])?;
	Ok(())
}

pub fn read_stream_header<R: Read>(reader: &mut R) -> io::Result<StreamHeader> {
	let mut magic = [0u8; 8];
	reader.read_exact(&mut magic)?;
	if magic != STREAM_HEADER_MAGIC {
		return Err(io::Error::new(
			io::ErrorKind::InvalidData,
			"missing stream header",
		));
	}
	let mut len = [0u8; 4];
	reader.read_exact(&mut len)?;
	let len = u32::from_le_bytes(len) as usize;
	if len > MAX_NAME_LEN {
		return Err(io::Error::new(
			io::ErrorKind::InvalidData,
			"oversized stream name",
		));
	}
	let mut name = vec![0u8; len];
	reader.read_exact(&mut name)?;
	let name = String::from_utf8(name)
		.map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "stream name is not utf-8"))?;
	let mut size = [0u8; 8];
	reader.read_exact(&mut size)?;
	let mut flag = [0u8; 1];
	reader.read_exact(&mut flag)?;
	Ok(StreamHeader {
		name,
		total_size: u64::from_le_bytes(size),
		compressed: flag[0] != 0,
	})
}

/// End-of-stream marker, written after the archive bytes.
pub fn write_stream_trailer<W: Write>(writer: &mut W) -> io::Result<()> {
	writer.write_all(&STREAM_TRAILER_MAGIC)?;
	writer.flush()
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	#[test]
	fn header_round_trips() {
		let header = StreamHeader {
			name: "data.tar".into(),
			total_size: 123_456,
			compressed: true,
		};
		let mut buf = Vec::new();
		write_stream_header(&mut buf, &header).unwrap();
		let read = read_stream_header(&mut Cursor::new(buf)).unwrap();
		assert_eq!(read, header);
	}

	#[test]
	fn garbage_is_rejected() {
		let err = read_stream_header(&mut Cursor::new(vec![0u8; 32])).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidData);
	}
}
