use thiserror::Error;
use tracing::{debug, info};

use super::{ChunkSink, SinkError, UnitRange};
use crate::backpressure::PauseGate;
use crate::signal::AbortSignal;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("sink rejected units {}..{}: {source}", chunk.start, chunk.end)]
    Append {
        chunk: UnitRange,
        #[source]
        source: SinkError,
    },

    #[error("finalizing output failed: {0}")]
    Finalize(#[source] SinkError),

    #[error("aborted at unit {cursor}")]
    Aborted { cursor: u64 },
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutput {
    /// Whatever the sink returned from `finalize`.
    pub output: serde_json::Value,
    pub units: u64,
    pub chunks: u64,
}

/// Resumable loop over `total` units, `chunk_size` at a time.
///
/// Progress lives in an explicit cursor rather than in the call stack, so a
/// pause simply stops the loop from taking the next chunk until the gate
/// reopens. Between chunks the processor yields to the runtime, which is what
/// lets the backpressure monitor's timer fire during a long run.
#[derive(Debug)]
pub struct ChunkProcessor {
    total: u64,
    chunk_size: u64,
    cursor: u64,
    chunks: u64,
}

impl ChunkProcessor {
    pub fn new(total: u64, chunk_size: u64) -> Self {
        Self {
            total,
            chunk_size: chunk_size.max(1),
            cursor: 0,
            chunks: 0,
        }
    }

    /// Units emitted so far.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.chunks
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.total
    }

    fn next_chunk(&self) -> UnitRange {
        UnitRange {
            start: self.cursor,
            end: self.cursor.saturating_add(self.chunk_size).min(self.total),
        }
    }

    /// Drive the cursor to the end, then finalize the sink.
    ///
    /// On any failure the sink is discarded; partial output is never
    /// finalized.
    pub async fn run(
        &mut self,
        mut sink: Box<dyn ChunkSink>,
        gate: &PauseGate,
        abort: &AbortSignal,
    ) -> Result<ChunkOutput, ProcessError> {
        while !self.is_done() {
            if abort.is_raised() {
                sink.discard().await;
                return Err(ProcessError::Aborted {
                    cursor: self.cursor,
                });
            }

            if gate.is_paused() {
                debug!(cursor = self.cursor, "paused, idling until resumed");
                tokio::select! {
                    _ = gate.wait_resumed() => {}
                    _ = abort.raised() => {}
                }
                // re-check abort and gate before taking the next chunk
                continue;
            }

            let chunk = self.next_chunk();
            let appended = tokio::select! {
                res = sink.append(chunk) => Some(res),
                _ = abort.raised() => None,
            };
            match appended {
                Some(Ok(())) => {}
                Some(Err(source)) => {
                    sink.discard().await;
                    return Err(ProcessError::Append { chunk, source });
                }
                None => {
                    sink.discard().await;
                    return Err(ProcessError::Aborted {
                        cursor: self.cursor,
                    });
                }
            }
            self.cursor = chunk.end;
            self.chunks += 1;
            debug!(
                start = chunk.start,
                end = chunk.end,
                total = self.total,
                "chunk emitted"
            );

            tokio::task::yield_now().await;
        }

        let output = sink.finalize().await.map_err(ProcessError::Finalize)?;
        info!(units = self.total, chunks = self.chunks, "all chunks emitted");
        Ok(ChunkOutput {
            output,
            units: self.total,
            chunks: self.chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    use crate::backpressure::{BackpressureMonitor, MemoryProbe};
    use crate::config::BackpressureConfig;
    use crate::signal::abort_pair;

    #[derive(Debug, Default)]
    struct Journal {
        chunks: Vec<UnitRange>,
        started_at: Vec<Instant>,
        finalized: bool,
        discarded: bool,
    }

    /// Records every call; optionally fails or stalls on append.
    struct RecordingSink {
        journal: Arc<Mutex<Journal>>,
        fail_at_chunk: Option<usize>,
        append_delay: Duration,
    }

    impl RecordingSink {
        fn new(journal: &Arc<Mutex<Journal>>) -> Self {
            Self {
                journal: journal.clone(),
                fail_at_chunk: None,
                append_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ChunkSink for RecordingSink {
        async fn append(&mut self, chunk: UnitRange) -> Result<(), SinkError> {
            let index = {
                let mut journal = self.journal.lock().unwrap();
                journal.started_at.push(Instant::now());
                journal.chunks.len()
            };
            if self.fail_at_chunk == Some(index) {
                return Err(SinkError::Other("disk full".into()));
            }
            if !self.append_delay.is_zero() {
                tokio::time::sleep(self.append_delay).await;
            }
            self.journal.lock().unwrap().chunks.push(chunk);
            Ok(())
        }

        async fn finalize(self: Box<Self>) -> Result<serde_json::Value, SinkError> {
            let mut journal = self.journal.lock().unwrap();
            journal.finalized = true;
            Ok(json!({ "chunks": journal.chunks.len() }))
        }

        async fn discard(self: Box<Self>) {
            self.journal.lock().unwrap().discarded = true;
        }
    }

    fn assert_contiguous(chunks: &[UnitRange], total: u64) {
        let mut expected = 0;
        for chunk in chunks {
            assert_eq!(chunk.start, expected, "gap or overlap at {chunk:?}");
            expected = chunk.end;
        }
        assert_eq!(expected, total);
    }

    #[tokio::test]
    async fn emits_exact_contiguous_chunks() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let mut processor = ChunkProcessor::new(2_000, 500);

        let out = processor
            .run(
                Box::new(RecordingSink::new(&journal)),
                &PauseGate::new(),
                &AbortSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(out.chunks, 4);
        assert_eq!(out.units, 2_000);
        assert_eq!(out.output, json!({ "chunks": 4 }));

        let journal = journal.lock().unwrap();
        assert!(journal.finalized);
        assert!(!journal.discarded);
        assert_contiguous(&journal.chunks, 2_000);
        assert!(journal.chunks.iter().all(|c| c.len() == 500));
    }

    #[rstest]
    #[case::short_tail(1_201, 500, vec![500, 500, 201])]
    #[case::single_small_chunk(10, 500, vec![10])]
    #[case::chunk_of_one(3, 1, vec![1, 1, 1])]
    #[tokio::test]
    async fn chunk_lengths_cover_every_unit_once(
        #[case] total: u64,
        #[case] chunk_size: u64,
        #[case] expected: Vec<u64>,
    ) {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let mut processor = ChunkProcessor::new(total, chunk_size);

        processor
            .run(
                Box::new(RecordingSink::new(&journal)),
                &PauseGate::new(),
                &AbortSignal::never(),
            )
            .await
            .unwrap();

        let journal = journal.lock().unwrap();
        let lens: Vec<u64> = journal.chunks.iter().map(UnitRange::len).collect();
        assert_eq!(lens, expected);
        assert_contiguous(&journal.chunks, total);
        assert_eq!(processor.cursor(), total);
        assert!(processor.is_done());
    }

    #[tokio::test]
    async fn zero_units_finalizes_without_appending() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let mut processor = ChunkProcessor::new(0, 500);

        let out = processor
            .run(
                Box::new(RecordingSink::new(&journal)),
                &PauseGate::new(),
                &AbortSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(out.chunks, 0);
        let journal = journal.lock().unwrap();
        assert!(journal.chunks.is_empty());
        assert!(journal.finalized);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_cycles_keep_chunks_contiguous() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let gate = PauseGate::new();
        let mut sink = RecordingSink::new(&journal);
        sink.append_delay = Duration::from_millis(100);

        let run = tokio::spawn({
            let gate = gate.clone();
            async move {
                let mut processor = ChunkProcessor::new(2_000, 500);
                processor
                    .run(Box::new(sink), &gate, &AbortSignal::never())
                    .await
            }
        });

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gate.pause();
            let emitted = journal.lock().unwrap().chunks.len();
            tokio::time::sleep(Duration::from_secs(5)).await;
            // at most the chunk already in flight lands while paused
            assert!(journal.lock().unwrap().chunks.len() <= emitted + 1);
            gate.resume();
        }

        let out = run.await.unwrap().unwrap();
        assert_eq!(out.chunks, 4);
        assert_contiguous(&journal.lock().unwrap().chunks, 2_000);
    }

    struct OneSpikeProbe {
        calls: Mutex<u32>,
    }

    impl MemoryProbe for OneSpikeProbe {
        fn sample(&self) -> Option<u64> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            Some(if *calls == 1 { u64::MAX } else { 0 })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn memory_spike_delays_next_chunk_by_cooldown() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let gate = PauseGate::new();
        let mut sink = RecordingSink::new(&journal);
        sink.append_delay = Duration::from_millis(400);

        let start = Instant::now();
        let monitor = BackpressureMonitor::spawn(
            BackpressureConfig::default()
                .with_sample_interval(Duration::from_secs(1))
                .with_pause_cooldown(Duration::from_secs(2)),
            Arc::new(OneSpikeProbe {
                calls: Mutex::new(0),
            }),
            gate.clone(),
        );

        let mut processor = ChunkProcessor::new(2_000, 500);
        processor
            .run(Box::new(sink), &gate, &AbortSignal::never())
            .await
            .unwrap();
        let stats = monitor.stop().await;
        assert_eq!(stats.pauses, 1);

        // chunks start at 0.0, 0.4, 0.8; the spike at 1.0 holds chunk 4
        // until the cool-down ends at 3.0
        let journal = journal.lock().unwrap();
        let fourth = journal.started_at[3] - start;
        assert!(fourth >= Duration::from_secs(3), "started after {fourth:?}");
        assert_contiguous(&journal.chunks, 2_000);
    }

    #[tokio::test]
    async fn sink_failure_discards_instead_of_finalizing() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let mut sink = RecordingSink::new(&journal);
        sink.fail_at_chunk = Some(2);
        let mut processor = ChunkProcessor::new(2_000, 500);

        let err = processor
            .run(Box::new(sink), &PauseGate::new(), &AbortSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProcessError::Append {
                chunk: UnitRange { start: 1_000, end: 1_500 },
                ..
            }
        ));
        assert_eq!(processor.cursor(), 1_000);
        assert_eq!(processor.chunks_emitted(), 2);
        let journal = journal.lock().unwrap();
        assert!(journal.discarded);
        assert!(!journal.finalized);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_while_paused_discards() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let gate = PauseGate::new();
        gate.pause();
        let (handle, signal) = abort_pair();

        let run = tokio::spawn({
            let gate = gate.clone();
            let sink = RecordingSink::new(&journal);
            async move {
                let mut processor = ChunkProcessor::new(2_000, 500);
                processor.run(Box::new(sink), &gate, &signal).await
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.abort();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, ProcessError::Aborted { cursor: 0 }));
        let journal = journal.lock().unwrap();
        assert!(journal.chunks.is_empty());
        assert!(journal.discarded);
    }
}
