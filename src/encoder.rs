use compression_codecs::{EncodeV2, gzip::GzipEncoder as GzipCodec};
use compression_core::Level;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::fmt;
use std::io::{self, Write};

/// Size of the scratch buffer compressed output is staged in before it is
/// handed to the transport.
pub const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// Gzip framing over a transport sink.
///
/// The encoder owns only compressor state. The sink is passed to each call so
/// the owner of the transport can keep using it (for headers, commit) between
/// writes.
pub struct GzipEncoder {
    codec: GzipCodec,
    output_buffer: Vec<u8>,
    finished: bool,
    bytes_in: u64,
    bytes_out: u64,
}

impl GzipEncoder {
    /// Creates an encoder compressing at the given level.
    pub fn new(level: Level) -> Self {
        Self {
            codec: GzipCodec::new(level.into()),
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
            finished: false,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Compresses `input`, forwarding whatever compressed output is ready to `sink`.
    pub fn write<W>(&mut self, input: &[u8], sink: &mut W) -> io::Result<()>
    where
        W: Write + ?Sized,
    {
        if self.finished {
            return Err(io::Error::other("gzip stream already finished"));
        }

        let mut input_buf = PartialBuffer::new(input);

        // Keep encoding until all input is consumed
        while input_buf.written_len() < input.len() {
            let consumed = input_buf.written_len();
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

            self.codec
                .encode(&mut input_buf, &mut output)
                .map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                sink.write_all(&self.output_buffer[..written])?;
                self.bytes_out += written as u64;
            }

            if written == 0 && input_buf.written_len() == consumed {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "gzip encoder made no progress",
                ));
            }
        }

        self.bytes_in += input.len() as u64;
        Ok(())
    }

    /// Pushes all buffered compressed data to `sink` without ending the stream.
    pub fn flush<W>(&mut self, sink: &mut W) -> io::Result<()>
    where
        W: Write + ?Sized,
    {
        if self.finished {
            return Ok(());
        }

        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = self.codec.flush(&mut output).map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                sink.write_all(&self.output_buffer[..written])?;
                self.bytes_out += written as u64;
            }
            if done {
                break;
            }
        }

        sink.flush()
    }

    /// Ends the stream, writing the CRC32 and length trailer to `sink`.
    ///
    /// Only the first call does anything.
    pub fn finish<W>(&mut self, sink: &mut W) -> io::Result<()>
    where
        W: Write + ?Sized,
    {
        if self.finished {
            return Ok(());
        }

        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = self.codec.finish(&mut output).map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                sink.write_all(&self.output_buffer[..written])?;
                self.bytes_out += written as u64;
            }
            if done {
                break;
            }
        }

        self.finished = true;
        sink.flush()
    }

    /// Whether the encoder can accept more data. Writes are blocking, so always true.
    pub fn is_ready(&self) -> bool {
        true
    }

    /// Whether the trailer has been written.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of uncompressed bytes accepted so far.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Number of compressed bytes handed to the sink so far.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }
}

impl fmt::Debug for GzipEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipEncoder")
            .field("finished", &self.finished)
            .field("bytes_in", &self.bytes_in)
            .field("bytes_out", &self.bytes_out)
            .finish()
    }
}
