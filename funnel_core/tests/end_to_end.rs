use funnel_core::config::{GeneratorSource, Settings};
use funnel_core::executor::{Outcome, TargetCommand};
use funnel_core::fixer::FixerClient;
use funnel_core::netstring;
use funnel_core::{
    Backoff, CrashArchive, Digest, FunnelError, FuzzLoop, GeneratorClient, Iteration,
    MAX_CANDIDATE_LEN, Session, Stats, Workdir,
};
use std::fs;
use std::io::{BufReader, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Serves a readiness banner, then one payload per connection.
fn spawn_generator(payloads: Vec<Vec<u8>>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || {
        let banner = b"radamsa ready".to_vec();
        for payload in std::iter::once(banner).chain(payloads) {
            let (mut conn, _) = listener.accept().unwrap();
            // the client stops reading oversized payloads early
            let _ = conn.write_all(&payload);
        }
    });
    (addr, handle)
}

/// A fixer peer that answers every request through `transform`.
fn spawn_fixer(
    requests: usize,
    transform: fn(&[u8]) -> Vec<u8>,
) -> (UnixStream, JoinHandle<Vec<Vec<u8>>>) {
    let (client, server) = UnixStream::pair().unwrap();
    let handle = thread::spawn(move || {
        let mut reader = BufReader::new(server);
        let mut seen = Vec::new();
        for _ in 0..requests {
            let request = netstring::decode(&mut reader).unwrap();
            netstring::write_frame(reader.get_mut(), &transform(&request)).unwrap();
            seen.push(request);
        }
        seen
    });
    (client, handle)
}

struct Harness {
    _dir: tempfile::TempDir,
    workdir: Workdir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workdir = Workdir::prepare(&dir.path().join("work"), ".cur_input").unwrap();
        Self { _dir: dir, workdir }
    }

    fn target(&self) -> TargetCommand {
        TargetCommand::resolve(
            &["/bin/target".to_string(), "@@".to_string()],
            self.workdir.staged_path(),
            None,
        )
        .unwrap()
    }

    fn crash_records(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.workdir.crash_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    fn staged(&self) -> Vec<u8> {
        fs::read(self.workdir.staged_path()).unwrap()
    }
}

fn faulting(diagnostic: &'static str) -> impl FnMut(&TargetCommand) -> Result<Outcome, FunnelError> {
    move |_: &TargetCommand| {
        Ok(Outcome::Fault {
            diagnostic: diagnostic.to_string(),
        })
    }
}

fn clean(_: &TargetCommand) -> Result<Outcome, FunnelError> {
    Ok(Outcome::NoFault)
}

#[test]
fn clean_run_stages_input_and_archives_nothing() {
    let harness = Harness::new();
    let (addr, server) = spawn_generator(vec![b"ABCD".to_vec()]);
    let generator = GeneratorClient::connect(&addr, &Backoff::default()).unwrap();
    let stats = Arc::new(Stats::new());

    let mut fuzz = FuzzLoop::new(
        generator,
        harness.workdir.stager(),
        CrashArchive::new(harness.workdir.crash_dir()),
        clean,
        harness.target(),
        Arc::clone(&stats),
    );

    assert_eq!(fuzz.run_once().unwrap(), Iteration::Clean);
    assert_eq!(harness.staged(), b"ABCD");
    assert!(harness.crash_records().is_empty());
    assert_eq!(stats.iterations(), 1);
    server.join().unwrap();
}

#[test]
fn oversized_generator_output_is_skipped() {
    let harness = Harness::new();
    let (addr, server) = spawn_generator(vec![vec![b'Z'; 11 * 1024 * 1024]]);
    let generator = GeneratorClient::connect(&addr, &Backoff::default()).unwrap();
    let stats = Arc::new(Stats::new());

    let mut fuzz = FuzzLoop::new(
        generator,
        harness.workdir.stager(),
        CrashArchive::new(harness.workdir.crash_dir()),
        |_: &TargetCommand| -> Result<Outcome, FunnelError> {
            panic!("oversized candidates must never execute")
        },
        harness.target(),
        Arc::clone(&stats),
    );

    assert_eq!(
        fuzz.run_once().unwrap(),
        Iteration::Skipped {
            len: MAX_CANDIDATE_LEN + 1
        }
    );
    // still the bootstrap placeholder
    assert_eq!(harness.staged(), b"test");
    assert_eq!(stats.iterations(), 0);
    server.join().unwrap();
}

#[test]
fn fault_is_archived_under_sha1_of_input() {
    let harness = Harness::new();
    let input = b"\x00\x01\x02".to_vec();
    let (addr, server) = spawn_generator(vec![input.clone()]);
    let generator = GeneratorClient::connect(&addr, &Backoff::default()).unwrap();

    let mut fuzz = FuzzLoop::new(
        generator,
        harness.workdir.stager(),
        CrashArchive::new(harness.workdir.crash_dir()),
        faulting("SIGSEGV"),
        harness.target(),
        Arc::new(Stats::new()),
    );

    let Iteration::Fault {
        diagnostic, record, ..
    } = fuzz.run_once().unwrap()
    else {
        panic!("expected a fault");
    };
    assert!(diagnostic.contains("SIGSEGV"));
    assert_eq!(
        record,
        harness
            .workdir
            .crash_dir()
            .join(format!("{}.raw", Digest::of(&input).to_hex()))
    );
    assert_eq!(
        record.file_name().unwrap(),
        "0c7a623fd2bbc05b06423be359e4021d36e721ad.raw"
    );
    assert_eq!(fs::read(&record).unwrap(), input);
    assert_eq!(
        harness.crash_records(),
        vec![format!("{}.raw", Digest::of(&input).to_hex())]
    );
    server.join().unwrap();
}

#[test]
fn fixed_input_is_staged_but_record_is_named_from_generator_bytes() {
    let harness = Harness::new();
    let (addr, server) = spawn_generator(vec![b"A".to_vec()]);
    let generator = GeneratorClient::connect(&addr, &Backoff::default()).unwrap();
    let (fixer_stream, fixer) = spawn_fixer(1, |req| req.repeat(4));

    let mut fuzz = FuzzLoop::new(
        generator,
        harness.workdir.stager(),
        CrashArchive::new(harness.workdir.crash_dir()),
        faulting("SIGABRT"),
        harness.target(),
        Arc::new(Stats::new()),
    )
    .with_fixer(Box::new(FixerClient::new("fixer", fixer_stream)));

    let iteration = fuzz.run_once().unwrap();
    assert_eq!(harness.staged(), b"AAAA");
    assert_eq!(
        harness.crash_records(),
        vec![format!("{}.raw", Digest::of(b"A").to_hex())]
    );
    assert!(matches!(iteration, Iteration::Fault { digest, .. } if digest == Digest::of(b"A")));
    assert_eq!(fixer.join().unwrap(), vec![b"A".to_vec()]);
    server.join().unwrap();
}

#[test]
fn no_op_fixer_keeps_record_name_equal_to_staged_digest() {
    let harness = Harness::new();
    let (addr, server) = spawn_generator(vec![b"same bytes".to_vec()]);
    let generator = GeneratorClient::connect(&addr, &Backoff::default()).unwrap();
    let (fixer_stream, fixer) = spawn_fixer(1, |req| req.to_vec());

    let mut fuzz = FuzzLoop::new(
        generator,
        harness.workdir.stager(),
        CrashArchive::new(harness.workdir.crash_dir()),
        faulting("SIGSEGV"),
        harness.target(),
        Arc::new(Stats::new()),
    )
    .with_fixer(Box::new(FixerClient::new("fixer", fixer_stream)));

    fuzz.run_once().unwrap();
    let staged_digest = Digest::of(&harness.staged());
    assert_eq!(
        harness.crash_records(),
        vec![format!("{}.raw", staged_digest.to_hex())]
    );
    fixer.join().unwrap();
    server.join().unwrap();
}

#[test]
fn session_runs_a_real_target() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("work");
    let (addr, server) = spawn_generator(vec![b"hello".to_vec(), b"CRASH".to_vec()]);

    let settings = Settings {
        file_name: ".cur_input".to_string(),
        dest: dest.clone(),
        source: GeneratorSource::Remote(addr),
        fixer: None,
        timeout: Some(Duration::from_secs(10)),
        command: vec![
            "sh".to_string(),
            "-c".to_string(),
            "grep -q CRASH \"$1\" && kill -SEGV $$; exit 0".to_string(),
            "target".to_string(),
            "@@".to_string(),
        ],
        max_iterations: Some(2),
        report_interval: Duration::from_secs(30),
    };

    let session = Session::bootstrap(settings).unwrap();
    let stats = Arc::clone(session.stats());
    let bootstrapped = Instant::now();
    session.run().unwrap();

    // the clock starts with the loop, not with the startup checks
    assert!(stats.started() >= bootstrapped);

    assert_eq!(stats.iterations(), 2);
    assert_eq!(stats.crashes(), 1);
    let record = dest
        .join("crashes")
        .join(format!("{}.raw", Digest::of(b"CRASH").to_hex()));
    assert_eq!(fs::read(record).unwrap(), b"CRASH");
    assert_eq!(fs::read(dest.join(".cur_input")).unwrap(), b"CRASH");
    server.join().unwrap();
}

#[test]
fn session_without_generator_fails_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let settings = Settings {
        file_name: ".cur_input".to_string(),
        dest: dir.path().join("work"),
        source: GeneratorSource::Remote(addr),
        fixer: None,
        timeout: None,
        command: vec!["/bin/true".to_string(), "@@".to_string()],
        max_iterations: Some(1),
        report_interval: Duration::from_secs(30),
    };
    let err = Session::bootstrap(settings).err().unwrap();
    assert_eq!(err.kind(), funnel_core::FailureKind::Connectivity);
}
