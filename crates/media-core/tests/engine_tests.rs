//! End-to-end engine tests: configuration loading, conference sessions
//! scheduled on media workers, and shutdown.

use confmix_media_core::config::EngineConfig;
use confmix_media_core::conference::ConferenceEventKind;
use confmix_media_core::session::{DtmfEvent, DtmfTone};
use confmix_media_core::{AudioPort, ConferenceSession, MediaEngine, MediaError, MediaSession, Result, SessionId};
use parking_lot::Mutex;
use serial_test::serial;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("confmix_media_core=debug")
        .with_test_writer()
        .try_init();
}

/// Transport playing a constant level and recording whatever it is sent
struct LevelPort {
    level: i16,
    sent: Arc<Mutex<Vec<i16>>>,
}

impl AudioPort for LevelPort {
    fn get(&mut self, _ts: u64, buf: &mut [i16], _rate: u32) -> Result<usize> {
        buf.fill(self.level);
        Ok(buf.len())
    }

    fn put(&mut self, _ts: u64, samples: &[i16], _rate: u32) -> Result<usize> {
        self.sent.lock().extend_from_slice(samples);
        Ok(samples.len())
    }
}

fn participant(name: &str, rate: u32, level: i16) -> (Arc<ConferenceSession>, Arc<Mutex<Vec<i16>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let port = LevelPort {
        level,
        sent: sent.clone(),
    };
    let session = ConferenceSession::new(SessionId::from(name), rate, 10, Box::new(port));
    (Arc::new(session), sent)
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn small_engine() -> MediaEngine {
    let mut config = EngineConfig::default();
    config.scheduler.worker_count = 2;
    MediaEngine::start(config).unwrap()
}

#[test]
#[serial]
fn participants_hear_each_other_through_scheduler() {
    init_tracing();
    let engine = small_engine();
    let events = engine.events().unwrap().clone();
    let mut alice_events = events.register(SessionId::from("alice"));

    let (alice, alice_heard) = participant("alice", 8000, 1000);
    let (bob, bob_heard) = participant("bob", 16000, -1000);

    alice.attach(engine.registry().get_or_create_channel("standup", "alice", 8000).unwrap());
    bob.attach(engine.registry().get_or_create_channel("standup", "bob", 16000).unwrap());
    let alice_worker = engine.scheduler().add_session(alice.clone(), "standup").unwrap();
    let bob_worker = engine.scheduler().add_session(bob.clone(), "standup").unwrap();
    assert_eq!(alice_worker, bob_worker);

    assert!(eventually(|| alice_heard.lock().iter().any(|&s| s < 0)));
    assert!(eventually(|| bob_heard.lock().iter().any(|&s| s > 0)));
    assert!(alice_heard.lock().iter().all(|&s| s <= 0), "alice must not hear herself");
    assert!(bob_heard.lock().iter().all(|&s| s >= 0), "bob must not hear himself");

    assert_eq!(alice_events.try_recv().unwrap().kind, ConferenceEventKind::FirstParticipant);
    assert_eq!(alice_events.try_recv().unwrap().kind, ConferenceEventKind::NewParticipant);

    engine.scheduler().remove_session(bob.session_id()).unwrap();
    assert!(eventually(|| !bob.is_processing_media()));
    drop(bob.detach());
    assert_eq!(alice_events.try_recv().unwrap().kind, ConferenceEventKind::ParticipantLeft);
    assert_eq!(engine.registry().participant_count(&"standup".into()), 1);

    engine.shutdown();
    assert!(!alice.is_processing_media());
    assert!(engine.scheduler().is_shut_down());
}

#[test]
#[serial]
fn dtmf_is_delivered_on_the_worker() {
    init_tracing();
    let engine = small_engine();
    let digits = Arc::new(Mutex::new(String::new()));
    let seen = digits.clone();
    let port = LevelPort {
        level: 0,
        sent: Arc::new(Mutex::new(Vec::new())),
    };
    let session = Arc::new(
        ConferenceSession::new(SessionId::from("caller"), 8000, 10, Box::new(port))
            .with_dtmf_handler(Box::new(move |_, event| seen.lock().push(event.tone.to_char()))),
    );

    engine.scheduler().add_session(session.clone(), "ivr").unwrap();
    session.dtmf_queue().post_digits("12#", 80);
    session.dtmf_queue().post(DtmfEvent::new(DtmfTone::Star, 40));

    assert!(eventually(|| digits.lock().len() == 4));
    assert_eq!(digits.lock().as_str(), "12#*");
}

#[test]
#[serial]
fn failing_transport_clears_conference_membership() {
    init_tracing();

    struct BrokenPort {
        calls: Arc<AtomicUsize>,
    }

    impl AudioPort for BrokenPort {
        fn get(&mut self, _ts: u64, _buf: &mut [i16], _rate: u32) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MediaError::transport("peer unreachable"))
        }

        fn put(&mut self, _ts: u64, samples: &[i16], _rate: u32) -> Result<usize> {
            Ok(samples.len())
        }
    }

    let engine = small_engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let broken = Arc::new(ConferenceSession::new(
        SessionId::from("broken"),
        8000,
        10,
        Box::new(BrokenPort { calls: calls.clone() }),
    ));
    broken.attach(engine.registry().get_or_create_channel("lobby", "broken", 8000).unwrap());
    assert!(engine.registry().room_exists(&"lobby".into()));

    engine.scheduler().add_session(broken.clone(), "lobby").unwrap();
    assert!(eventually(|| !broken.is_attached()));
    assert!(eventually(|| engine.scheduler().session_count() == 0));
    assert!(!broken.is_processing_media());
    assert!(!engine.registry().room_exists(&"lobby".into()));
    assert!(calls.load(Ordering::SeqCst) >= 1);
}

#[test]
#[serial]
fn engine_config_loads_from_file_with_env_override() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "[scheduler]\nworker_count = 3\ntick_interval_ms = 10\n\n[mixer]\nmixer_delay_ms = 40\n\n[logging]\nlevel = \"debug\""
    )
    .unwrap();

    std::env::set_var("CONFMIX_MIXER__BUFFER_MS", "2000");
    let loaded = EngineConfig::load(file.path());
    std::env::remove_var("CONFMIX_MIXER__BUFFER_MS");
    let config = loaded.unwrap();

    assert_eq!(config.scheduler.worker_count, 3);
    assert_eq!(config.mixer.mixer_delay_ms, 40);
    assert_eq!(config.mixer.buffer_ms, 2000);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.conference.max_participants, None);

    let engine = MediaEngine::from_config_file(file.path()).unwrap();
    assert_eq!(engine.scheduler().worker_count(), 3);
    assert_eq!(engine.config().mixer.mixer_delay_ms, 40);
}

#[test]
#[serial]
fn invalid_config_is_rejected_before_start() {
    let mut config = EngineConfig::default();
    config.mixer.buffer_ms = 20;
    assert!(matches!(MediaEngine::start(config), Err(MediaError::InvalidConfig { .. })));

    let missing = EngineConfig::load("/nonexistent/confmix.toml");
    assert!(matches!(missing, Err(MediaError::Config(_))));
}
