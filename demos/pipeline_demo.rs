//! Пример полного прохода: сценарий -> озвучка -> шкала -> субтитры
//!
//! Запуск:
//! `cargo run --example pipeline_demo -- script.json voices.json [config.json]`
//!
//! Ключи облачных провайдеров берутся из `OPENAI_API_KEY` и `ELEVEN_API`.

use anyhow::{bail, Context};

use reel_sync::captions::{write_captions, CaptionFormat};
use reel_sync::notification::LogProgressObserver;
use reel_sync::script::{load_script, load_voices};
use reel_sync::{ReelSync, ReelSyncConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Инициализируем логирование
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        bail!("usage: pipeline_demo <script.json> <voices.json> [config.json]");
    }

    let script = load_script(&args[0]).with_context(|| format!("failed to load script {}", args[0]))?;
    let voices = load_voices(&args[1]).with_context(|| format!("failed to load voices {}", args[1]))?;
    let config = match args.get(2) {
        Some(path) => ReelSyncConfig::from_json_file(path)?,
        None => ReelSyncConfig::default(),
    }
    .apply_env();

    let reel = ReelSync::new(config)?;
    reel.add_observer(Box::new(LogProgressObserver::with_prefix("[demo] ")));

    // Ctrl+C останавливает запуск новых реплик
    let cancel = reel.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let output = reel.process(&script.turns, &voices).await?;

    let audio = &output.timeline.combined_audio_path;
    let srt_path = audio.with_extension(CaptionFormat::Srt.extension());
    write_captions(&srt_path, &output.captions, CaptionFormat::Srt).await?;

    println!("Аудио: {}", audio.display());
    println!("Субтитры: {}", srt_path.display());
    println!(
        "Длительность {:.2}s, коэффициент {:.4}, слов {}, окон {}",
        output.timeline.true_duration_seconds,
        output.timeline.scale_factor,
        output.timeline.words.len(),
        output.captions.len()
    );
    if !output.timeline.dropped_turns.is_empty() {
        println!("Пропущены реплики: {:?}", output.timeline.dropped_turns);
    }

    Ok(())
}
