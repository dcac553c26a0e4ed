use std::env;
use std::fs;
use std::process;

use legato::selection::TextEditor;
use legato::{
    AbcTypesetter, MemorySurface, NoteOutput, PlaybackState, Player, PlayerConfig, ScoreAdapter, SourceText,
};

/// Prints note messages instead of sounding them.
struct PrintOutput;

impl NoteOutput for PrintOutput {
    fn note_on(&mut self, pitch: u8, velocity: u8) {
        println!("on  {:3} vel {}", pitch, velocity);
    }

    fn note_off(&mut self, pitch: u8) {
        println!("off {:3}", pitch);
    }

    fn all_notes_off(&mut self) {
        println!("all notes off");
    }
}

struct NoEditor;

impl TextEditor for NoEditor {
    fn set_selection(&mut self, _start: usize, _end: usize) {}
    fn scroll_to(&mut self, _top: f64) {}
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: legato <input.abc> [config.yaml]");
        eprintln!("       legato --play <input.abc> [config.yaml]");
        process::exit(1);
    }

    let mut play = false;
    let mut input_path = &args[1];
    let mut config_path: Option<&String> = args.get(2);

    // Parse flags
    if args[1] == "--play" {
        play = true;
        if args.len() < 3 {
            eprintln!("Usage: legato --play <input.abc> [config.yaml]");
            process::exit(1);
        }
        input_path = &args[2];
        config_path = args.get(3);
    }

    let source = match fs::read_to_string(input_path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", input_path, e);
            process::exit(1);
        }
    };

    let config = match config_path {
        Some(path) => {
            let content = match fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    eprintln!("Error reading config '{}': {}", path, e);
                    process::exit(1);
                }
            };
            match PlayerConfig::from_yaml(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{}", e);
                    process::exit(1);
                }
            }
        }
        None => PlayerConfig::default(),
    };

    if play {
        if let Err(e) = run_playback(source, &config) {
            eprintln!("Playback error: {}", e);
            process::exit(1);
        }
        return;
    }

    let mut adapter = ScoreAdapter::new(config.typesetter());
    let score = match adapter.compile(&SourceText::from(source)) {
        Ok(score) => score,
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&score.tunes) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing score: {}", e);
            process::exit(1);
        }
    }
}

fn run_playback(source: String, config: &PlayerConfig) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| e.to_string())?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async {
        let (player, handle) = Player::<AbcTypesetter, _, _, _>::new(
            ScoreAdapter::new(config.typesetter()),
            config.timeline_synth(PrintOutput),
            MemorySurface::new(),
            NoEditor,
            config,
        );
        let task = tokio::task::spawn_local(player.run());
        let mut state = handle.subscribe();

        handle.edit(source);
        handle.toggle();
        let outcome: PlaybackState = state
            .wait_for(|s| matches!(s, PlaybackState::Running | PlaybackState::Error(_)))
            .await
            .map(|s| s.clone())
            .map_err(|e| e.to_string())?;
        if outcome == PlaybackState::Running {
            state
                .wait_for(|s| !s.is_active())
                .await
                .map_err(|e| e.to_string())?;
        }

        drop(handle);
        let player = task.await.map_err(|e| e.to_string())?;
        if let Some(e) = player.compile_error() {
            return Err(e.to_string());
        }
        match outcome {
            PlaybackState::Error(reason) => Err(reason),
            _ => Ok(()),
        }
    })
}
