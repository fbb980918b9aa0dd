use std::sync::Arc;
use std::{env, fs};

use eyre::{eyre, Result};
use tracing_subscriber::EnvFilter;

use voiceprint_rs::{MemoryStore, SpeakerEngine};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let phrase = args
        .next()
        .ok_or_else(|| eyre!("usage: voiceprint-rs <phrase> <speaker=audio.wav>..."))?;

    let engine = SpeakerEngine::new(Arc::new(MemoryStore::new()));

    let mut probe: Option<(String, Vec<u8>)> = None;
    for spec in args {
        let (speaker, path) = spec
            .split_once('=')
            .ok_or_else(|| eyre!("expected <speaker=audio.wav>, got {spec:?}"))?;
        let audio = fs::read(path)?;
        let print = engine.enroll(speaker, &phrase, &audio)?;
        println!("enrolled {speaker} ({:.2}s of audio)", print.audio_seconds);
        if probe.is_none() {
            probe = Some((speaker.to_string(), audio));
        }
    }

    let (speaker, audio) = probe.ok_or_else(|| eyre!("no enrollments given"))?;

    let verification = engine.verify(&speaker, &phrase, &audio)?;
    println!(
        "verify {speaker}: confidence {:.4}, match: {}",
        verification.confidence, verification.is_match
    );

    let identification = engine.identify(&phrase, &audio)?;
    println!("identification ranking:");
    for candidate in &identification.candidates {
        println!("  {}: {:.4}", candidate.identity, candidate.confidence);
    }

    Ok(())
}
