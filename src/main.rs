mod analysis;
mod audio_decoder;
mod audio_player;
mod config;
mod config_persistence;
mod db_manager;
mod playlist;
mod playlist_manager;
mod protocol;
mod ui_manager;

use std::thread;

use analysis::{AnalysisFrame, AnalysisMaster, SpectrumAnalyzer};
use audio_decoder::AudioDecoder;
use audio_player::AudioPlayer;
use db_manager::DbManager;
use log::{debug, error, info};
use playlist::Playlist;
use playlist_manager::PlaylistManager;
use protocol::{AnalysisMessage, ConfigMessage, Message, PlaybackMessage, PlaylistMessage};
use slint::ComponentHandle;
use tokio::sync::broadcast;
use ui_manager::UiManager;

slint::include_modules!();

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    if std::env::var_os("SLINT_BACKEND").is_none() {
        std::env::set_var("SLINT_BACKEND", "winit-software");
        info!("SLINT_BACKEND not set. Defaulting to winit-software");
    }

    let config_file = config_persistence::config_file_path();
    let config = config_persistence::load_or_create(&config_file);

    let ui = AppWindow::new()?;
    ui.window().set_size(slint::LogicalSize::new(
        config.ui.window_width as f32,
        config.ui.window_height as f32,
    ));
    ui.set_volume(config.ui.volume);

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);

    // Analysis plugins broadcast frames into the bus under their name.
    let mut analysis_master = AnalysisMaster::new();
    let spectrum = SpectrumAnalyzer::new(&config.analysis);
    let spectrum_settings = spectrum.settings();
    analysis_master.register_plugin(Box::new(spectrum));

    let analysis_bus_sender = bus_sender.clone();
    analysis_master.on(
        SpectrumAnalyzer::NAME,
        Box::new(move |frame| {
            let AnalysisFrame::Spectrum(bytes) = frame;
            let _ = analysis_bus_sender.send(Message::Analysis(AnalysisMessage::SpectrumFrame(
                bytes.clone(),
            )));
        }),
    );
    let tap = analysis_master.create_track_tap();

    // Setup file dialog
    let bus_sender_clone = bus_sender.clone();
    ui.on_open_files(move || {
        debug!("Opening file dialog");
        if let Some(paths) = rfd::FileDialog::new()
            .add_filter("Audio Files", &["mp3", "wav", "ogg", "flac", "m4a", "aac"])
            .pick_files()
        {
            let _ = bus_sender_clone.send(Message::Playlist(PlaylistMessage::AddFiles(paths)));
        }
    });

    let bus_sender_clone = bus_sender.clone();
    ui.on_add_link(move |url| {
        let url = url.trim().to_string();
        if url.is_empty() {
            return;
        }
        debug!("Adding link {}", url);
        let _ = bus_sender_clone.send(Message::Playlist(PlaylistMessage::AddLink(url)));
    });

    // Transport buttons
    let bus_sender_clone = bus_sender.clone();
    let ui_handle_clone = ui.as_weak().clone();
    ui.on_play_pause(move || {
        let playing = ui_handle_clone
            .upgrade()
            .map(|ui| ui.get_playing())
            .unwrap_or(false);
        let message = if playing {
            PlaybackMessage::Pause
        } else {
            PlaybackMessage::Play
        };
        debug!("Play/pause button clicked, sending {:?}", message);
        let _ = bus_sender_clone.send(Message::Playback(message));
    });

    let bus_sender_clone = bus_sender.clone();
    ui.on_stop(move || {
        debug!("Stop button clicked");
        let _ = bus_sender_clone.send(Message::Playback(PlaybackMessage::Stop));
    });

    let bus_sender_clone = bus_sender.clone();
    ui.on_next(move || {
        debug!("Next button clicked");
        let _ = bus_sender_clone.send(Message::Playback(PlaybackMessage::Next));
    });

    let bus_sender_clone = bus_sender.clone();
    ui.on_previous(move || {
        debug!("Previous button clicked");
        let _ = bus_sender_clone.send(Message::Playback(PlaybackMessage::Previous));
    });

    let bus_sender_clone = bus_sender.clone();
    ui.on_seek(move |fraction| {
        debug!("Seek requested to {:.3}", fraction);
        let _ = bus_sender_clone.send(Message::Playback(PlaybackMessage::Seek(fraction)));
    });

    let bus_sender_clone = bus_sender.clone();
    ui.on_volume_changed(move |volume| {
        let _ = bus_sender_clone.send(Message::Playback(PlaybackMessage::SetVolume(
            volume.clamp(0.0, 1.0),
        )));
    });

    // Playlist interactions
    let bus_sender_clone = bus_sender.clone();
    ui.on_select_item(move |index| {
        let _ = bus_sender_clone.send(Message::Playlist(PlaylistMessage::SelectItem(
            index as usize,
        )));
    });

    let bus_sender_clone = bus_sender.clone();
    ui.on_play_item(move |index| {
        debug!("Playlist item double-clicked: {}", index);
        let _ = bus_sender_clone.send(Message::Playlist(PlaylistMessage::PlayItemByIndex(
            index as usize,
        )));
    });

    let bus_sender_clone = bus_sender.clone();
    ui.on_remove_item(move |index| {
        debug!("Remove item requested: {}", index);
        let _ = bus_sender_clone.send(Message::Playlist(PlaylistMessage::RemoveItem(
            index as usize,
        )));
    });

    // Setup playlist manager
    let playlist_manager_bus_receiver = bus_sender.subscribe();
    let playlist_manager_bus_sender = bus_sender.clone();
    let db_manager = DbManager::new().expect("Failed to initialize database");
    thread::spawn(move || {
        let mut playlist_manager = PlaylistManager::new(
            Playlist::new(),
            playlist_manager_bus_receiver,
            playlist_manager_bus_sender,
            db_manager,
        );
        playlist_manager.run();
    });

    // Setup UI manager
    let ui_manager_bus_receiver = bus_sender.subscribe();
    let ui_handle_clone = ui.as_weak().clone();
    thread::spawn(move || {
        let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut ui_manager = UiManager::new(ui_handle_clone, ui_manager_bus_receiver);
            ui_manager.run();
        }));
        if let Err(payload) = run_result {
            error!(
                "UiManager thread terminated due to panic: {}",
                panic_payload_to_string(payload.as_ref())
            );
        }
    });

    // Setup AudioDecoder
    let decoder_bus_sender = bus_sender.clone();
    let decoder_bus_receiver = bus_sender.subscribe();
    thread::spawn(move || {
        let mut audio_decoder = AudioDecoder::new(decoder_bus_receiver, decoder_bus_sender);
        audio_decoder.run();
    });

    // Setup AudioPlayer. Built inside its thread, the output stream stays
    // on the thread that created it.
    let player_bus_sender = bus_sender.clone();
    let player_bus_receiver = bus_sender.subscribe();
    let player_tap = tap.clone();
    let player_config = config.clone();
    thread::spawn(move || {
        let mut audio_player = AudioPlayer::new(
            player_bus_receiver,
            player_bus_sender,
            player_tap,
            &player_config,
        );
        audio_player.run();
    });

    // Config updates: retune the analysis loop and let the UI mirror them.
    let config_bus_receiver = bus_sender.subscribe();
    thread::spawn(move || {
        let mut receiver = config_bus_receiver;
        while let Ok(message) = receiver.blocking_recv() {
            if let Message::Config(ConfigMessage::Updated(config)) = message {
                debug!("Applying updated config");
                spectrum_settings.set_fft_size(config.analysis.fft_size);
            }
        }
    });

    let _ = bus_sender.send(Message::Config(ConfigMessage::Updated(config.clone())));

    ui.run()?;

    analysis_master.reset();

    let mut final_config = config;
    final_config.ui.volume = ui.get_volume().clamp(0.0, 1.0);
    let size = ui.window().size();
    if size.width > 0 && size.height > 0 {
        final_config.ui.window_width = size.width;
        final_config.ui.window_height = size.height;
    }
    config_persistence::save(&config_file, &final_config);

    info!("Application exiting");
    Ok(())
}
