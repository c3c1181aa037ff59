//! Acquisition cycle state machine.
//!
//! One cycle forces a fresh sample, reads the whole register bank, decodes
//! it and publishes the result, then sleeps and starts over on the same
//! connection:
//!
//! ```text
//! Disconnected -> Connecting -> ForceSampling -> Reading -> Decoding
//!                                    ^                          |
//!                                    |                          v
//!                                 Sleeping  <-------------  Publishing
//! ```
//!
//! Any failure while connecting, reading or publishing drops the connection
//! and ends the loop for good: `Disconnected` is where the loop starts and
//! where it stops. A failed force-sample write is only logged.

use sondesight_common::current_timestamp_nanos;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CycleTiming;
use crate::decoder::{ParameterRecord, RegisterDecoder};
use crate::publisher::{Publish, PublishError};
use crate::registers::{FORCE_SAMPLE_REGISTER, REGISTER_COUNT, RegisterBank, force_sample_word};
use crate::transport::{Connect, InstrumentTransport, TransportError};

/// Phases of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Disconnected,
    Connecting,
    ForceSampling,
    Reading,
    Decoding,
    Publishing,
    Sleeping,
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

impl Phase {
    /// The phase that follows `self` after `outcome`.
    ///
    /// Every failure leads to `Disconnected`. Leaving `Disconnected` starts a
    /// connection attempt; [`Acquisition::run`] only does that once.
    pub fn next(self, outcome: Outcome) -> Phase {
        match (self, outcome) {
            (Phase::Disconnected, Outcome::Completed) => Phase::Connecting,
            (Phase::Connecting, Outcome::Completed) => Phase::ForceSampling,
            (Phase::ForceSampling, _) => Phase::Reading,
            (Phase::Reading, Outcome::Completed) => Phase::Decoding,
            (Phase::Decoding, _) => Phase::Publishing,
            (Phase::Publishing, Outcome::Completed) => Phase::Sleeping,
            (Phase::Sleeping, _) => Phase::ForceSampling,
            (_, Outcome::Failed) => Phase::Disconnected,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting => "connecting",
            Phase::ForceSampling => "force-sampling",
            Phase::Reading => "reading",
            Phase::Decoding => "decoding",
            Phase::Publishing => "publishing",
            Phase::Sleeping => "sleeping",
        })
    }
}

/// Why the acquisition loop stopped.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("could not connect to the instrument")]
    Connect(#[source] TransportError),
    #[error("reading register {address} failed")]
    Read {
        address: u16,
        #[source]
        source: TransportError,
    },
    #[error("publishing decoded records failed")]
    Publish(#[source] PublishError),
    #[error("{from} phase moved to {found}")]
    Transition {
        from: Phase,
        expected: Phase,
        found: Phase,
    },
}

impl AcquisitionError {
    /// Phase the failure happened in.
    pub fn phase(&self) -> Phase {
        match self {
            AcquisitionError::Connect(_) => Phase::Connecting,
            AcquisitionError::Read { .. } => Phase::Reading,
            AcquisitionError::Publish(_) => Phase::Publishing,
            AcquisitionError::Transition { from, .. } => *from,
        }
    }

    /// Message of the underlying transport or publication error.
    pub fn source_message(&self) -> String {
        match self {
            AcquisitionError::Connect(e) | AcquisitionError::Read { source: e, .. } => e.to_string(),
            AcquisitionError::Publish(e) => e.to_string(),
            AcquisitionError::Transition { expected, .. } => format!("expected {}", expected),
        }
    }
}

/// Loop state, carrying whatever the next phase works on.
///
/// Every connected state owns the transport, so leaving them for
/// `Disconnected` closes the connection.
pub enum State<T> {
    Disconnected,
    Connecting,
    ForceSampling {
        transport: T,
    },
    Reading {
        transport: T,
    },
    Decoding {
        transport: T,
        bank: RegisterBank,
        acquired_at: i64,
    },
    Publishing {
        transport: T,
        records: Vec<ParameterRecord>,
        acquired_at: i64,
    },
    Sleeping {
        transport: T,
    },
}

impl<T> State<T> {
    pub fn phase(&self) -> Phase {
        match self {
            State::Disconnected => Phase::Disconnected,
            State::Connecting => Phase::Connecting,
            State::ForceSampling { .. } => Phase::ForceSampling,
            State::Reading { .. } => Phase::Reading,
            State::Decoding { .. } => Phase::Decoding,
            State::Publishing { .. } => Phase::Publishing,
            State::Sleeping { .. } => Phase::Sleeping,
        }
    }
}

impl<T> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "State({})", self.phase())
    }
}

/// Check the state a phase produced against [`Phase::next`].
fn advance<T>(
    from: Phase,
    result: Result<State<T>, AcquisitionError>,
) -> Result<State<T>, AcquisitionError> {
    let state = result?;
    let expected = from.next(Outcome::Completed);
    if state.phase() != expected {
        return Err(AcquisitionError::Transition {
            from,
            expected,
            found: state.phase(),
        });
    }
    Ok(state)
}

/// Drives the acquisition loop for one instrument.
pub struct Acquisition<C, P> {
    name: String,
    connector: C,
    decoder: RegisterDecoder,
    publisher: P,
    timing: CycleTiming,
    cycles: u64,
}

impl<C, P> Acquisition<C, P>
where
    C: Connect,
    P: Publish,
{
    pub fn new(
        name: impl Into<String>,
        connector: C,
        decoder: RegisterDecoder,
        publisher: P,
        timing: CycleTiming,
    ) -> Self {
        Self {
            name: name.into(),
            connector,
            decoder,
            publisher,
            timing,
            cycles: 0,
        }
    }

    /// Number of cycles published so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Connect and poll until something fails.
    ///
    /// Returns the failure that stopped the loop; there is no other way out.
    pub async fn run(mut self) -> AcquisitionError {
        info!(
            instrument = %self.name,
            sleep_secs = self.timing.sleep.as_secs(),
            "Starting acquisition"
        );

        let mut state = State::Disconnected;
        loop {
            let phase = state.phase();
            let result = self.step(state).await;
            match advance(phase, result) {
                Ok(next) => state = next,
                Err(e) => {
                    error!(
                        instrument = %self.name,
                        phase = %phase,
                        next = %phase.next(Outcome::Failed),
                        cycles = self.cycles,
                        "Acquisition stopped: {}: {}",
                        e,
                        e.source_message()
                    );
                    return e;
                }
            }
        }
    }

    /// Run the phase `state` stands for and return the state that follows.
    ///
    /// `Disconnected` only leads to `Connecting`; no I/O happens there. On
    /// error the transport, if any, has been dropped and the caller is back
    /// in `Disconnected`.
    pub async fn step(
        &mut self,
        state: State<C::Transport>,
    ) -> Result<State<C::Transport>, AcquisitionError> {
        match state {
            State::Disconnected => Ok(State::Connecting),

            State::Connecting => {
                let transport = self
                    .connector
                    .connect()
                    .await
                    .map_err(AcquisitionError::Connect)?;
                info!(instrument = %self.name, "Successful connection");
                Ok(State::ForceSampling { transport })
            }

            State::ForceSampling { mut transport } => {
                if let Err(e) = transport
                    .write_register(FORCE_SAMPLE_REGISTER, force_sample_word())
                    .await
                {
                    warn!(instrument = %self.name, "Force sample failed, reading current values: {}", e);
                }
                tokio::time::sleep(self.timing.sample_dwell).await;
                Ok(State::Reading { transport })
            }

            State::Reading { mut transport } => {
                let mut words = [0u16; REGISTER_COUNT];
                for (address, word) in (0u16..).zip(words.iter_mut()) {
                    *word = transport
                        .read_register(address)
                        .await
                        .map_err(|source| AcquisitionError::Read { address, source })?;
                }
                let acquired_at = current_timestamp_nanos();
                debug!(instrument = %self.name, registers = REGISTER_COUNT, "Register bank read");
                Ok(State::Decoding {
                    transport,
                    bank: RegisterBank::new(words),
                    acquired_at,
                })
            }

            State::Decoding {
                transport,
                bank,
                acquired_at,
            } => {
                let records = self.decoder.decode(&bank);
                debug!(instrument = %self.name, records = records.len(), "Register bank decoded");
                Ok(State::Publishing {
                    transport,
                    records,
                    acquired_at,
                })
            }

            State::Publishing {
                transport,
                records,
                acquired_at,
            } => {
                self.publisher
                    .publish(&records, acquired_at)
                    .await
                    .map_err(AcquisitionError::Publish)?;
                self.cycles += 1;
                info!(
                    instrument = %self.name,
                    cycle = self.cycles,
                    records = records.len(),
                    "Published decoded records"
                );
                Ok(State::Sleeping { transport })
            }

            State::Sleeping { transport } => {
                info!(
                    instrument = %self.name,
                    "Sleeping for {} seconds",
                    self.timing.sleep.as_secs()
                );
                tokio::time::sleep(self.timing.sleep).await;
                Ok(State::ForceSampling { transport })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::LookupTable;
    use crate::registers::{Slot, f32_to_words_le};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Connect,
        Write(u16, u16),
        Read(u16),
    }

    #[derive(Clone)]
    struct Script {
        words: Arc<[u16; REGISTER_COUNT]>,
        refuse_connect: bool,
        fail_write: bool,
        fail_read_at: Option<u16>,
        log: Arc<Mutex<Vec<Op>>>,
    }

    impl Script {
        fn new(words: [u16; REGISTER_COUNT]) -> Self {
            Self {
                words: Arc::new(words),
                refuse_connect: false,
                fail_write: false,
                fail_read_at: None,
                log: Arc::default(),
            }
        }

        fn ops(&self) -> Vec<Op> {
            self.log.lock().unwrap().clone()
        }

        fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
            self.ops().iter().filter(|op| pred(op)).count()
        }
    }

    struct ScriptedTransport(Script);

    impl InstrumentTransport for ScriptedTransport {
        async fn read_register(&mut self, address: u16) -> Result<u16, TransportError> {
            self.0.log.lock().unwrap().push(Op::Read(address));
            if self.0.fail_read_at == Some(address) {
                return Err(TransportError::Timeout {
                    address,
                    timeout: Duration::from_millis(50),
                });
            }
            Ok(self.0.words[usize::from(address)])
        }

        async fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
            self.0.log.lock().unwrap().push(Op::Write(address, value));
            if self.0.fail_write {
                return Err(TransportError::EmptyResponse { address });
            }
            Ok(())
        }
    }

    impl Connect for Script {
        type Transport = ScriptedTransport;

        async fn connect(&self) -> Result<ScriptedTransport, TransportError> {
            self.log.lock().unwrap().push(Op::Connect);
            if self.refuse_connect {
                return Err(TransportError::EmptyResponse { address: 0 });
            }
            Ok(ScriptedTransport(self.clone()))
        }
    }

    /// Accepts `accept` publications, then fails every further one.
    #[derive(Clone, Default)]
    struct Recorder {
        accept: usize,
        published: Arc<Mutex<Vec<(Vec<ParameterRecord>, i64)>>>,
    }

    impl Recorder {
        fn accepting(accept: usize) -> Self {
            Self {
                accept,
                ..Self::default()
            }
        }

        fn published(&self) -> Vec<(Vec<ParameterRecord>, i64)> {
            self.published.lock().unwrap().clone()
        }
    }

    impl Publish for Recorder {
        async fn publish(
            &self,
            records: &[ParameterRecord],
            acquired_at: i64,
        ) -> Result<(), PublishError> {
            let mut published = self.published.lock().unwrap();
            if published.len() >= self.accept {
                return Err(PublishError::Put {
                    key: "test".to_string(),
                    message: "sink closed".to_string(),
                });
            }
            published.push((records.to_vec(), acquired_at));
            Ok(())
        }
    }

    fn temperature_bank() -> [u16; REGISTER_COUNT] {
        let slot = Slot::new(0).unwrap();
        let (low, high) = f32_to_words_le(23.5);
        let mut words = [0u16; REGISTER_COUNT];
        words[usize::from(slot.code_address())] = 130;
        words[usize::from(slot.value_address())] = low;
        words[usize::from(slot.value_address()) + 1] = high;
        words
    }

    fn acquisition(script: Script, recorder: Recorder) -> Acquisition<Script, Recorder> {
        let table = LookupTable::from_pairs([(130u16, "Temperature")]).unwrap();
        Acquisition::new(
            "exosonde-test",
            script,
            RegisterDecoder::new(Arc::new(table)),
            recorder,
            CycleTiming {
                sample_dwell: Duration::ZERO,
                sleep: Duration::ZERO,
            },
        )
    }

    #[test]
    fn test_transition_table() {
        use Outcome::*;
        use Phase::*;

        assert_eq!(Disconnected.next(Completed), Connecting);
        assert_eq!(Connecting.next(Completed), ForceSampling);
        assert_eq!(Connecting.next(Failed), Disconnected);
        assert_eq!(ForceSampling.next(Completed), Reading);
        assert_eq!(ForceSampling.next(Failed), Reading);
        assert_eq!(Reading.next(Completed), Decoding);
        assert_eq!(Reading.next(Failed), Disconnected);
        assert_eq!(Decoding.next(Completed), Publishing);
        assert_eq!(Publishing.next(Completed), Sleeping);
        assert_eq!(Publishing.next(Failed), Disconnected);
        assert_eq!(Sleeping.next(Completed), ForceSampling);
    }

    #[test]
    fn test_failures_lead_to_disconnected() {
        for phase in [
            Phase::Disconnected,
            Phase::Connecting,
            Phase::Reading,
            Phase::Publishing,
        ] {
            assert_eq!(phase.next(Outcome::Failed), Phase::Disconnected);
        }
    }

    #[test]
    fn test_advance_checks_transition() {
        let err = advance(Phase::Reading, Ok(State::Sleeping { transport: () })).unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::Transition {
                from: Phase::Reading,
                expected: Phase::Decoding,
                found: Phase::Sleeping,
            }
        ));
        assert_eq!(err.phase(), Phase::Reading);
        assert_eq!(err.to_string(), "reading phase moved to sleeping");
        assert_eq!(err.source_message(), "expected decoding");

        let state = advance(Phase::Sleeping, Ok(State::ForceSampling { transport: () })).unwrap();
        assert_eq!(state.phase(), Phase::ForceSampling);

        let state = advance::<()>(Phase::Disconnected, Ok(State::Connecting)).unwrap();
        assert_eq!(state.phase(), Phase::Connecting);
    }

    #[tokio::test]
    async fn test_step_through_one_cycle() {
        let script = Script::new(temperature_bank());
        let recorder = Recorder::accepting(usize::MAX);
        let mut acq = acquisition(script.clone(), recorder.clone());

        let mut state = State::Disconnected;
        let mut phases = vec![state.phase()];
        for _ in 0..7 {
            state = acq.step(state).await.unwrap();
            phases.push(state.phase());
        }

        assert_eq!(
            phases,
            vec![
                Phase::Disconnected,
                Phase::Connecting,
                Phase::ForceSampling,
                Phase::Reading,
                Phase::Decoding,
                Phase::Publishing,
                Phase::Sleeping,
                Phase::ForceSampling,
            ]
        );
        assert_eq!(acq.cycles(), 1);
        assert_eq!(recorder.published().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_operations_in_order() {
        let script = Script::new(temperature_bank());
        let mut acq = acquisition(script.clone(), Recorder::accepting(usize::MAX));

        let mut state = State::Connecting;
        for _ in 0..3 {
            state = acq.step(state).await.unwrap();
        }
        assert_eq!(state.phase(), Phase::Decoding);

        let ops = script.ops();
        assert_eq!(ops[0], Op::Connect);
        assert_eq!(ops[1], Op::Write(1, 10));
        let reads: Vec<u16> = ops[2..]
            .iter()
            .map(|op| match op {
                Op::Read(address) => *address,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(reads, (0..REGISTER_COUNT as u16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_publishes_decoded_records() {
        let script = Script::new(temperature_bank());
        let recorder = Recorder::accepting(1);

        let before = current_timestamp_nanos();
        let err = acquisition(script, recorder.clone()).run().await;
        let after = current_timestamp_nanos();

        assert!(matches!(err, AcquisitionError::Publish(_)));
        let published = recorder.published();
        assert_eq!(published.len(), 1);

        let (records, acquired_at) = &published[0];
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Temperature");
        assert!(*acquired_at >= before && *acquired_at <= after);
    }

    #[tokio::test]
    async fn test_connect_failure_runs_no_cycle() {
        let mut script = Script::new(temperature_bank());
        script.refuse_connect = true;
        let recorder = Recorder::accepting(usize::MAX);

        let err = acquisition(script.clone(), recorder.clone()).run().await;

        assert!(matches!(err, AcquisitionError::Connect(_)));
        assert_eq!(err.phase(), Phase::Connecting);
        assert_eq!(script.ops(), vec![Op::Connect]);
        assert!(recorder.published().is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_aborts_without_publishing() {
        for failing in [0u16, 128, 287, 447, 671] {
            let mut script = Script::new(temperature_bank());
            script.fail_read_at = Some(failing);
            let recorder = Recorder::accepting(usize::MAX);

            let err = acquisition(script.clone(), recorder.clone()).run().await;

            match err {
                AcquisitionError::Read { address, .. } => assert_eq!(address, failing),
                other => panic!("expected read failure, got {other}"),
            }
            assert!(recorder.published().is_empty());
            // Nothing is read past the failing register, and no reconnect happens.
            assert_eq!(script.count(|op| matches!(op, Op::Read(_))), usize::from(failing) + 1);
            assert_eq!(script.count(|op| *op == Op::Connect), 1);
        }
    }

    #[tokio::test]
    async fn test_read_failure_in_later_cycle() {
        let mut script = Script::new(temperature_bank());
        script.fail_read_at = Some(300);
        let recorder = Recorder::accepting(usize::MAX);
        let mut acq = acquisition(script, recorder.clone());

        let mut state = State::Connecting;
        for _ in 0..2 {
            state = acq.step(state).await.unwrap();
        }
        assert_eq!(state.phase(), Phase::Reading);

        let err = acq.step(state).await.unwrap_err();
        assert_eq!(err.phase(), Phase::Reading);
        assert_eq!(acq.cycles(), 0);
        assert!(recorder.published().is_empty());
    }

    #[tokio::test]
    async fn test_force_sample_failure_is_not_fatal() {
        let mut script = Script::new(temperature_bank());
        script.fail_write = true;
        let recorder = Recorder::accepting(2);

        let err = acquisition(script.clone(), recorder.clone()).run().await;

        assert!(matches!(err, AcquisitionError::Publish(_)));
        assert_eq!(recorder.published().len(), 2);
        assert_eq!(script.count(|op| matches!(op, Op::Write(..))), 3);
    }

    #[tokio::test]
    async fn test_transport_reused_across_cycles() {
        let script = Script::new(temperature_bank());
        let recorder = Recorder::accepting(3);

        let err = acquisition(script.clone(), recorder.clone()).run().await;

        assert!(matches!(err, AcquisitionError::Publish(_)));
        assert_eq!(recorder.published().len(), 3);
        assert_eq!(script.count(|op| *op == Op::Connect), 1);
        assert_eq!(
            script.count(|op| matches!(op, Op::Read(_))),
            4 * REGISTER_COUNT
        );
    }

    #[tokio::test]
    async fn test_disconnected_step_only_starts_connecting() {
        let script = Script::new(temperature_bank());
        let mut acq = acquisition(script.clone(), Recorder::default());

        let state = acq.step(State::Disconnected).await.unwrap();
        assert_eq!(state.phase(), Phase::Connecting);
        assert!(script.ops().is_empty());
    }
}
