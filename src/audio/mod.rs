//! Audio I/O for the CLI frontend.
//!
//! Reads raw mono `f32` little-endian PCM from any reader and writes the
//! simulated output in the same format.

use std::io::{Read, Write};

use crate::error::{Result, TransimError};
use crate::solver::Simulation;

/// Buffer size for audio processing (in samples).
pub const BUFFER_SIZE: usize = 256;

/// Reads blocks of samples from a byte stream.
pub struct AudioInput<R> {
    reader: R,
    buffer: Vec<u8>,
    /// Bytes of an incomplete sample carried over from the last read.
    pending: usize,
}

impl<R: Read> AudioInput<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: vec![0u8; BUFFER_SIZE * 4],
            pending: 0,
        }
    }

    /// Read up to `samples.len()` samples. Returns the number of samples
    /// read, or 0 on end of stream.
    pub fn read_block(&mut self, samples: &mut [f64]) -> Result<usize> {
        let bytes_wanted = samples.len() * 4;
        if self.buffer.len() < bytes_wanted {
            self.buffer.resize(bytes_wanted, 0);
        }

        let mut filled = self.pending;
        while filled < 4 {
            let n = self
                .reader
                .read(&mut self.buffer[filled..bytes_wanted])
                .map_err(|e| TransimError::AudioInputError {
                    message: e.to_string(),
                })?;
            if n == 0 {
                return Ok(0);
            }
            filled += n;
        }

        let count = filled / 4;
        for (i, sample) in samples.iter_mut().take(count).enumerate() {
            let bytes = [
                self.buffer[i * 4],
                self.buffer[i * 4 + 1],
                self.buffer[i * 4 + 2],
                self.buffer[i * 4 + 3],
            ];
            *sample = f32::from_le_bytes(bytes) as f64;
        }

        self.pending = filled % 4;
        self.buffer.copy_within(count * 4..filled, 0);
        Ok(count)
    }
}

/// Writes blocks of samples to a byte stream.
pub struct AudioOutput<W> {
    writer: W,
    buffer: Vec<u8>,
}

impl<W: Write> AudioOutput<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: vec![0u8; BUFFER_SIZE * 4],
        }
    }

    pub fn write_block(&mut self, samples: &[f64]) -> Result<()> {
        let bytes_needed = samples.len() * 4;
        if self.buffer.len() < bytes_needed {
            self.buffer.resize(bytes_needed, 0);
        }

        for (chunk, &sample) in self.buffer.chunks_exact_mut(4).zip(samples) {
            chunk.copy_from_slice(&(sample as f32).to_le_bytes());
        }

        self.writer
            .write_all(&self.buffer[..bytes_needed])
            .map_err(|e| TransimError::AudioOutputError {
                message: e.to_string(),
            })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| TransimError::AudioOutputError {
            message: e.to_string(),
        })
    }
}

/// Run `simulation` over the whole input stream, feeding its first input
/// and writing its first output. Returns the number of samples processed.
pub fn process_audio<R: Read, W: Write>(simulation: &mut Simulation, reader: R, writer: W) -> Result<u64> {
    if simulation.inputs().len() != 1 || simulation.outputs().is_empty() {
        return Err(TransimError::invalid_argument(format!(
            "audio processing needs exactly one input and at least one output, the simulation has {} and {}",
            simulation.inputs().len(),
            simulation.outputs().len()
        )));
    }

    let mut input = AudioInput::new(reader);
    let mut output = AudioOutput::new(writer);

    let mut in_samples = vec![0.0; BUFFER_SIZE];
    let mut out_samples: Vec<Vec<f64>> = vec![vec![0.0; BUFFER_SIZE]; simulation.outputs().len()];
    let mut total = 0u64;

    loop {
        let samples_read = input.read_block(&mut in_samples)?;
        if samples_read == 0 {
            break;
        }

        let mut outputs: Vec<&mut [f64]> = out_samples.iter_mut().map(|b| &mut b[..]).collect();
        simulation.run(samples_read, &[&in_samples[..]], &mut outputs)?;
        output.write_block(&out_samples[0][..samples_read])?;
        total += samples_read as u64;
    }

    output.flush()?;
    Ok(total)
}
