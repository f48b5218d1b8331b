// Built-in media engine using ffmpeg-next
// Requires FFmpeg libraries: libavcodec, libavformat, libavutil, libswscale
//
// To install FFmpeg development libraries:
// - Ubuntu/Debian: sudo apt install libavcodec-dev libavformat-dev libavutil-dev libswscale-dev libavdevice-dev
// - Fedora: sudo dnf install ffmpeg-devel
// - macOS: brew install ffmpeg
// - Windows: Download from https://ffmpeg.org and set FFMPEG_DIR environment variable

use super::engine::{EngineEvent, EventHub, MediaEngine, Subscription, TimeControl};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

/// Decoded video frame, RGB24
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub pts: i64,
}

/// Commands to the decode thread
enum DecoderCommand {
    Stop,
    Pause,
    Resume,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Media engine backed by a decode thread per item
pub struct InternalEngine {
    hub: EventHub,
    user_agent: String,
    time_control: Arc<Mutex<TimeControl>>,
    current_frame: Arc<Mutex<Option<DecodedFrame>>>,
    command_sender: Option<Sender<DecoderCommand>>,
    muted: bool,
}

impl InternalEngine {
    pub fn new(user_agent: impl Into<String>) -> Self {
        #[cfg(feature = "internal-player")]
        decoder::init();

        Self {
            hub: EventHub::new(),
            user_agent: user_agent.into(),
            time_control: Arc::new(Mutex::new(TimeControl::Paused)),
            current_frame: Arc::new(Mutex::new(None)),
            command_sender: None,
            muted: false,
        }
    }

    /// Latest decoded frame, if one arrived since the last call
    pub fn take_frame(&self) -> Option<DecodedFrame> {
        lock(&self.current_frame).take()
    }

    fn send(&self, command: DecoderCommand) -> bool {
        match self.command_sender {
            Some(ref sender) => sender.send(command).is_ok(),
            None => false,
        }
    }
}

impl MediaEngine for InternalEngine {
    fn subscribe(&mut self) -> Subscription {
        self.hub.subscribe()
    }

    fn load_item(&mut self, url: &str) -> Subscription {
        self.release_item();

        let (generation, subscription) = self.hub.begin_item();
        *lock(&self.time_control) = TimeControl::Waiting;
        self.hub.publish(EngineEvent::Buffering);

        let job = DecodeJob {
            url: url.to_string(),
            user_agent: self.user_agent.clone(),
            generation,
            hub: self.hub.clone(),
            time_control: Arc::clone(&self.time_control),
            current_frame: Arc::clone(&self.current_frame),
        };
        self.command_sender = job.spawn();
        subscription
    }

    fn release_item(&mut self) {
        self.send(DecoderCommand::Stop);
        self.command_sender = None;
        self.hub.end_item();
        *lock(&self.time_control) = TimeControl::Paused;
        *lock(&self.current_frame) = None;
    }

    fn play(&mut self) {
        self.send(DecoderCommand::Resume);
    }

    fn pause(&mut self) {
        self.send(DecoderCommand::Pause);
    }

    fn time_control(&self) -> TimeControl {
        *lock(&self.time_control)
    }

    // Video-only decoder, so mute is a flag the engine echoes back
    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.hub.publish(EngineEvent::MuteChanged(muted));
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn shutdown(&mut self) {
        self.release_item();
        self.hub.close();
    }
}

impl Drop for InternalEngine {
    fn drop(&mut self) {
        self.send(DecoderCommand::Stop);
    }
}

/// Everything a decode thread needs for one item. Shared state is only
/// written while `generation` is still the engine's current item.
struct DecodeJob {
    url: String,
    user_agent: String,
    generation: u64,
    hub: EventHub,
    time_control: Arc<Mutex<TimeControl>>,
    current_frame: Arc<Mutex<Option<DecodedFrame>>>,
}

impl DecodeJob {
    fn fail(&self, message: String) {
        tracing::warn!(url = %self.url, error = %message, "Stream failed");
        self.finish(EngineEvent::ItemFailed(message));
    }

    /// Item is over: engine goes back to paused and `event` goes to the item
    fn finish(&self, event: EngineEvent) {
        let current = self.hub.if_current(self.generation, || {
            *lock(&self.time_control) = TimeControl::Paused;
        });
        if current.is_some() {
            self.hub.publish_item(self.generation, event);
        }
    }

    fn set_time_control(&self, value: TimeControl) {
        let event = match value {
            TimeControl::Playing => EngineEvent::Playing,
            TimeControl::Paused => EngineEvent::Paused,
            TimeControl::Waiting => EngineEvent::Buffering,
        };
        self.hub.publish_for_item(self.generation, event, || {
            *lock(&self.time_control) = value;
        });
    }

    fn store_frame(&self, frame: DecodedFrame) -> bool {
        self.hub
            .if_current(self.generation, || *lock(&self.current_frame) = Some(frame))
            .is_some()
    }
}

#[cfg(not(feature = "internal-player"))]
impl DecodeJob {
    fn spawn(self) -> Option<Sender<DecoderCommand>> {
        self.fail("Internal player not enabled. Build with --features internal-player".to_string());
        None
    }
}

#[cfg(feature = "internal-player")]
mod decoder {
    use super::{DecodeJob, DecodedFrame, DecoderCommand};
    use crate::player::engine::{EngineEvent, TimeControl};
    use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
    use std::thread;
    use std::time::{Duration, Instant};

    extern crate ffmpeg_next as ffmpeg;
    use ffmpeg::format::Pixel;
    use ffmpeg::media::Type;
    use ffmpeg::software::scaling::{context::Context as ScalingContext, flag::Flags};
    use ffmpeg::util::frame::video::Video as VideoFrame;

    const MAX_WIDTH: u32 = 1280;
    const MAX_HEIGHT: u32 = 720;

    pub(super) fn init() {
        if let Err(e) = ffmpeg::init() {
            tracing::error!(error = %e, "FFmpeg initialisation failed");
        }
    }

    struct OpenStream {
        input: ffmpeg::format::context::Input,
        video_index: usize,
        decoder: ffmpeg::decoder::Video,
        scaler: ScalingContext,
        width: u32,
        height: u32,
    }

    fn target_size(width: u32, height: u32) -> (u32, u32) {
        if width > MAX_WIDTH || height > MAX_HEIGHT {
            let scale = f64::min(
                MAX_WIDTH as f64 / width as f64,
                MAX_HEIGHT as f64 / height as f64,
            );
            ((width as f64 * scale) as u32, (height as f64 * scale) as u32)
        } else {
            (width, height)
        }
    }

    fn open(url: &str, user_agent: &str) -> Result<OpenStream, String> {
        let mut options = ffmpeg::Dictionary::new();
        options.set("user_agent", user_agent);
        options.set("reconnect", "1");
        options.set("reconnect_streamed", "1");
        options.set("reconnect_delay_max", "5");
        options.set("timeout", "5000000");

        let input = ffmpeg::format::input_with_dictionary(&url, options)
            .map_err(|e| format!("Failed to open stream: {}", e))?;

        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| "No video stream found".to_string())?;
        let video_index = stream.index();

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| format!("Unsupported codec parameters: {}", e))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| format!("Failed to create decoder: {}", e))?;

        let (width, height) = target_size(decoder.width(), decoder.height());
        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(|e| format!("Failed to create scaler: {}", e))?;

        Ok(OpenStream {
            input,
            video_index,
            decoder,
            scaler,
            width,
            height,
        })
    }

    fn copy_rgb(frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
        let data = frame.data(0);
        let stride = frame.stride(0);
        let row_len = width as usize * 3;

        let mut out = Vec::with_capacity(row_len * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            out.extend_from_slice(&data[start..start + row_len]);
        }
        out
    }

    impl DecodeJob {
        pub(super) fn spawn(self) -> Option<Sender<DecoderCommand>> {
            let (tx, rx) = channel();
            let spawned = thread::Builder::new()
                .name("decoder".to_string())
                .spawn(move || self.run(rx));
            match spawned {
                Ok(_) => Some(tx),
                Err(e) => {
                    tracing::error!(error = %e, "Could not start decode thread");
                    None
                }
            }
        }

        fn run(self, commands: Receiver<DecoderCommand>) {
            let mut stream = match open(&self.url, &self.user_agent) {
                Ok(s) => s,
                Err(message) => {
                    self.fail(message);
                    return;
                }
            };
            tracing::info!(url = %self.url, width = stream.width, height = stream.height, "Stream opened");
            self.hub.publish_item(self.generation, EngineEvent::ItemReady);

            let mut paused = false;
            let mut started = false;
            let frame_duration = Duration::from_secs_f64(1.0 / 30.0);
            let mut last_frame_time = Instant::now();

            for (packet_stream, packet) in stream.input.packets() {
                match commands.try_recv() {
                    Ok(DecoderCommand::Stop) | Err(TryRecvError::Disconnected) => return,
                    Ok(DecoderCommand::Pause) => {
                        paused = true;
                        self.set_time_control(TimeControl::Paused);
                    }
                    Ok(DecoderCommand::Resume) => {
                        paused = false;
                        if started {
                            self.set_time_control(TimeControl::Playing);
                        }
                    }
                    Err(TryRecvError::Empty) => {}
                }

                if paused {
                    thread::sleep(Duration::from_millis(50));
                    continue;
                }

                if packet_stream.index() != stream.video_index {
                    continue;
                }

                if stream.decoder.send_packet(&packet).is_err() {
                    continue;
                }

                let mut decoded = VideoFrame::empty();
                while stream.decoder.receive_frame(&mut decoded).is_ok() {
                    let mut rgb = VideoFrame::empty();
                    if stream.scaler.run(&decoded, &mut rgb).is_err() {
                        continue;
                    }

                    let stored = self.store_frame(DecodedFrame {
                        width: stream.width,
                        height: stream.height,
                        data: copy_rgb(&rgb, stream.width, stream.height),
                        pts: decoded.pts().unwrap_or(0),
                    });
                    if !stored {
                        return;
                    }

                    if !started {
                        started = true;
                        self.set_time_control(TimeControl::Playing);
                    }

                    let elapsed = last_frame_time.elapsed();
                    if elapsed < frame_duration {
                        thread::sleep(frame_duration - elapsed);
                    }
                    last_frame_time = Instant::now();
                }
            }

            self.finish(EngineEvent::PlaybackInterrupted("stream ended".to_string()));
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_target_size_caps_at_720p() {
            assert_eq!(target_size(640, 360), (640, 360));
            assert_eq!(target_size(1920, 1080), (1280, 720));
            assert_eq!(target_size(3840, 1600), (1280, 533));
        }
    }
}
