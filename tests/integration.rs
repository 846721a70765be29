//! End-to-end tests for relaycast.
//!
//! Each test writes a config file and a command file, runs a full
//! [`Server`] to completion, and inspects the broca outputs and the
//! acknowledgement stream.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use relaycast::{Server, ServerConfig};

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn write_commands(&self, lines: &[Value]) -> std::path::PathBuf {
        let path = self.path("commands.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    fn acks(&self) -> Vec<Value> {
        let text = std::fs::read_to_string(self.path("acks.jsonl")).unwrap_or_default();
        text.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

fn run_server(config_json: &str) {
    let config = ServerConfig::from_json(config_json).unwrap();
    Server::new(config).unwrap().run();
}

fn quoted(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

#[test]
fn test_silent_track_to_file_output() {
    let ws = Workspace::new();
    let commands = ws.write_commands(&[json!({"cmd": "sil", "param": 2.0}), json!({"cmd": "quit"})]);
    let output = ws.path("a.pcm");

    run_server(&format!(
        r#"{{
            "shell": {{ "type": "file", "config": "{}" }},
            "publish": [ {{ "type": "file", "config": "{}" }} ],
            "commands": {{ "sil": {{ "type": "silence" }} }},
            "pcmbuffer": {{ "format": "s16", "samplerate": 44100,
                           "channels": "stereo", "duration": 1.0, "skip": false }},
            "outputs": [
                {{ "type": "pcm", "broca": [ {{ "type": "file", "config": "{}" }} ] }}
            ]
        }}"#,
        quoted(&commands),
        quoted(&ws.path("acks.jsonl")),
        quoted(&output),
    ));

    // 2.0 s of s16 stereo at 44100 Hz, all zeros
    let written = std::fs::read(&output).unwrap();
    assert_eq!(written.len(), 44100 * 2 * 2 * 2);
    assert!(written.iter().all(|&b| b == 0));

    let acks = ws.acks();
    let original = json!({"cmd": "sil", "param": 2.0});
    let decoder_acks: Vec<_> = acks.iter().filter(|a| a["source"] == "decoder").collect();
    assert_eq!(decoder_acks.len(), 1);
    assert_eq!(decoder_acks[0]["type"], "acknowledge");
    assert_eq!(decoder_acks[0]["command"], original);

    let encoder_acks: Vec<_> = acks.iter().filter(|a| a["source"] == "encoder").collect();
    assert_eq!(encoder_acks.len(), 1);
    assert_eq!(encoder_acks[0]["index"], 0);
    assert_eq!(encoder_acks[0]["command"], original);

    // the file broca consumed the track's command packet
    let broca_acks: Vec<_> = acks.iter().filter(|a| a["source"] == "broca").collect();
    assert_eq!(broca_acks.len(), 1);
    assert_eq!(broca_acks[0]["index"], 0);
    assert_eq!(broca_acks[0]["command"], original);
}

#[test]
fn test_two_outputs_share_a_barrier_group() {
    let ws = Workspace::new();
    let commands = ws.write_commands(&[
        json!({"cmd": "sil", "param": 0.5}),
        json!({"cmd": "sil", "param": 0.5}),
        json!({"cmd": "quit"}),
    ]);

    run_server(&format!(
        r#"{{
            "shell": {{ "type": "file", "config": "{}" }},
            "publish": [ {{ "type": "file", "config": "{}" }} ],
            "commands": {{ "sil": {{ "type": "silence" }} }},
            "pcmbuffer": {{ "duration": 0.25, "skip": false }},
            "outputs": [
                {{ "type": "pcm", "barrier": "x",
                   "broca": [ {{ "type": "discard", "config": {{ "log": true }} }} ] }},
                {{ "type": "pcm", "barrier": "x",
                   "broca": [ {{ "type": "discard", "config": {{ "log": true }} }} ] }}
            ]
        }}"#,
        quoted(&commands),
        quoted(&ws.path("acks.jsonl")),
    ));

    // both encoders and both brocas must have consumed both tracks
    let acks = ws.acks();
    for index in 0..2u64 {
        let encoder: Vec<_> = acks
            .iter()
            .filter(|a| a["source"] == "encoder" && a["index"] == json!(index))
            .collect();
        assert_eq!(encoder.len(), 2, "encoder {index}: {acks:?}");

        let broca: Vec<_> = acks
            .iter()
            .filter(|a| a["source"] == "broca" && a["index"] == json!(index))
            .collect();
        assert_eq!(broca.len(), 2, "broca {index}: {acks:?}");
    }
}

#[test]
fn test_overrun_under_drop_policy_keeps_real_time() {
    let ws = Workspace::new();
    let commands = ws.write_commands(&[json!({"cmd": "sil", "param": 0.6}), json!({"cmd": "quit"})]);

    // tiny buffer, paced consumer: the producer must shed rather than
    // fall behind, and the whole run stays near real time without
    // crashing or deadlocking
    let start = Instant::now();
    run_server(&format!(
        r#"{{
            "shell": {{ "type": "file", "config": "{}" }},
            "commands": {{ "sil": {{ "type": "silence" }} }},
            "pcmbuffer": {{ "duration": 0.1, "skip": true,
                           "skipmargin": 0.01, "skipfactor": 1 }},
            "outputs": [
                {{ "type": "pcm",
                   "broca": [ {{ "type": "discard", "config": {{ "wait": true }} }} ] }}
            ]
        }}"#,
        quoted(&commands),
    ));
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
}

#[test]
fn test_unknown_command_is_ignored() {
    let ws = Workspace::new();
    let commands = ws.write_commands(&[
        json!({"cmd": "nosuchthing"}),
        json!({"cmd": "sil", "param": 0.1}),
        json!({"cmd": "quit"}),
    ]);
    let output = ws.path("out.pcm");

    run_server(&format!(
        r#"{{
            "shell": {{ "type": "file", "config": "{}" }},
            "publish": [ {{ "type": "file", "config": "{}" }} ],
            "commands": {{ "sil": {{ "type": "silence" }} }},
            "pcmbuffer": {{ "duration": 0.25, "skip": false }},
            "outputs": [
                {{ "type": "pcm", "broca": [ {{ "type": "file", "config": "{}" }} ] }}
            ]
        }}"#,
        quoted(&commands),
        quoted(&ws.path("acks.jsonl")),
        quoted(&output),
    ));

    // the unknown command produced no acknowledgement and no audio; the
    // following valid command still went through
    let acks = ws.acks();
    assert!(acks
        .iter()
        .all(|a| a["command"]["cmd"] != json!("nosuchthing")));
    assert!(acks.iter().any(|a| a["source"] == "decoder"));

    let written = std::fs::read(&output).unwrap();
    assert_eq!(written.len(), 4410 * 4);
}

#[test]
fn test_testcard_and_silence_back_to_back() {
    let ws = Workspace::new();
    let commands = ws.write_commands(&[
        json!({"cmd": "tone", "param": 0.2}),
        json!({"cmd": "sil", "param": 0.2}),
        json!({"cmd": "quit"}),
    ]);
    let output = ws.path("mix.pcm");

    run_server(&format!(
        r#"{{
            "shell": {{ "type": "file", "config": "{}" }},
            "commands": {{
                "sil": {{ "type": "silence" }},
                "tone": {{ "type": "testcard", "config": {{ "frequency": 440, "amplitude": 0.9 }} }}
            }},
            "pcmbuffer": {{ "duration": 0.25, "skip": false }},
            "outputs": [
                {{ "type": "pcm", "broca": [ {{ "type": "file", "config": "{}" }} ] }}
            ]
        }}"#,
        quoted(&commands),
        quoted(&output),
    ));

    // gapless: exactly 0.4 s of audio, tone first, silence after
    let written = std::fs::read(&output).unwrap();
    assert_eq!(written.len(), 2 * 8820 * 4);

    let (tone, silence) = written.split_at(8820 * 4);
    assert!(tone.iter().any(|&b| b != 0));
    assert!(silence.iter().all(|&b| b == 0));
}

#[test]
fn test_rerated_output_runs_alongside_native() {
    let ws = Workspace::new();
    let commands = ws.write_commands(&[json!({"cmd": "sil", "param": 0.5}), json!({"cmd": "quit"})]);
    let native = ws.path("native.pcm");
    let rerated = ws.path("rerated.pcm");

    run_server(&format!(
        r#"{{
            "shell": {{ "type": "file", "config": "{}" }},
            "commands": {{ "sil": {{ "type": "silence" }} }},
            "pcmbuffer": {{ "duration": 0.25, "skip": false }},
            "resampler": {{ "type": "linear" }},
            "outputs": [
                {{ "type": "pcm", "broca": [ {{ "type": "file", "config": "{}" }} ] }},
                {{ "type": "pcm", "config": {{ "samplerate": 22050 }},
                   "broca": [ {{ "type": "file", "config": "{}" }} ] }}
            ]
        }}"#,
        quoted(&commands),
        quoted(&native),
        quoted(&rerated),
    ));

    let native_bytes = std::fs::read(&native).unwrap().len();
    let rerated_bytes = std::fs::read(&rerated).unwrap().len() as i64;
    assert_eq!(native_bytes, 22050 * 4);
    // half the frames, within a few frames of boundary rounding
    assert!((rerated_bytes - 11025 * 4).abs() <= 16, "{rerated_bytes}");
}

#[test]
fn test_quit_without_work_exits_cleanly() {
    let ws = Workspace::new();
    let commands = ws.write_commands(&[json!({"cmd": "quit"})]);

    let start = Instant::now();
    run_server(&format!(
        r#"{{
            "shell": {{ "type": "file", "config": "{}" }},
            "commands": {{ "sil": {{ "type": "silence" }} }},
            "outputs": [
                {{ "type": "pcm", "broca": [ {{ "type": "discard" }} ] }}
            ]
        }}"#,
        quoted(&commands),
    ));
    assert!(start.elapsed() < Duration::from_secs(5));
}
