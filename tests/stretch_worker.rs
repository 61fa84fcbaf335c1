use std::process::Command;
#[cfg(unix)]
use std::time::{Duration, Instant};

use panda::derive::{InProcessScrypt, SubprocessScrypt};
use panda::record::KeyExchangeRecord;
use panda::{token, ScryptCost, SharedSecret, Status, StretchBackend};

const PANDA: &str = env!("CARGO_BIN_EXE_panda");

const TEST_COST: ScryptCost = ScryptCost { log_n: 6, r: 2, p: 1 };

#[test]
fn subprocess_matches_in_process() {
    let input = SharedSecret::text("correct horse").unwrap().canonical_bytes().unwrap();
    let worker = SubprocessScrypt::new(PANDA, vec!["stretch-worker".to_string()], TEST_COST);
    let remote = worker.stretch(&input).unwrap();
    let local = InProcessScrypt::new(TEST_COST).stretch(&input).unwrap();
    assert_eq!(&remote[..], &local[..]);
}

#[test]
fn broken_worker_is_an_error() {
    let input = b"anything".to_vec();
    let worker = SubprocessScrypt::new(PANDA, vec!["no-such-command".to_string()], TEST_COST);
    assert!(worker.stretch(&input).is_err());
}

#[test]
fn cli_tokens_validate() {
    let out = Command::new(PANDA).arg("token").output().unwrap();
    assert!(out.status.success());
    let printed = String::from_utf8(out.stdout).unwrap();
    let printed = printed.trim();
    assert!(token::validate(printed), "{}", printed);
    assert!(!token::is_strong(printed));

    let out = Command::new(PANDA).args(["token", "--strong"]).output().unwrap();
    let printed = String::from_utf8(out.stdout).unwrap();
    assert!(token::is_strong(printed.trim()));
}

#[test]
fn cli_check() {
    let ok = Command::new(PANDA).args(["check", "plain words"]).output().unwrap();
    assert!(ok.status.success());

    let mistyped = Command::new(PANDA).args(["check", "r!00"]).output().unwrap();
    assert!(!mistyped.status.success());
}

#[cfg(unix)]
#[test]
fn cli_interrupt_leaves_resumable_state() {
    use rand_core::OsRng;
    use std::net::TcpListener;

    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("card");
    let state = dir.path().join("alice.kx");
    std::fs::write(&payload, b"alice").unwrap();
    // nothing listens here, so the exchange keeps retrying the first message
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let secret = token::generate_strong(&mut OsRng).unwrap();

    let child = Command::new(PANDA)
        .args(["exchange", "--server", &format!("http://127.0.0.1:{}", port), "--secret", &secret])
        .arg("--payload")
        .arg(&payload)
        .arg("--state")
        .arg(&state)
        .env("PANDA_LOG", "warn")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let status = std::fs::read(&state).ok().and_then(|bytes| KeyExchangeRecord::decode(&bytes).ok()).map(|r| r.status);
        if status == Some(Status::Exchange1) {
            break;
        }
        assert!(Instant::now() < deadline, "exchange never reached EXCHANGE1");
        std::thread::sleep(Duration::from_millis(50));
    }

    let killed = Command::new("kill").args(["-INT", &child.id().to_string()]).status().unwrap();
    assert!(killed.success());
    let exit = child.wait_with_output().unwrap().status;
    // a clean error exit, not death by signal
    assert_eq!(exit.code(), Some(1));

    let record = KeyExchangeRecord::decode(&std::fs::read(&state).unwrap()).unwrap();
    assert_eq!(record.status, Status::Exchange1);
    assert_eq!(record.key_exchange_bytes, b"alice");
}
