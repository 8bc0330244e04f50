use anyhow::{anyhow, Result};
use arena_capture::ScreenSource;
use arena_advisor::RatingMethod;
use arena_data::{ArenaData, CardId, TierTables};
use arena_state::{
    CaptureTiming, DraftEffect, DraftEvent, DraftSession, PickSource, SessionStatus,
};
use arena_vision::{HistogramIndex, ScreenGeometry, ScreenLocator};
use image::RgbaImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;

/// Session inputs from the game-log parser or the UI
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    EnterArena,
    BeginDraft {
        hero: String,
        existing_deck: Vec<String>,
    },
    PickCard {
        code: String,
        source: PickSource,
    },
    LeaveArena,
    EndDraft,
    Resync,
    SetCardPool {
        codes: Vec<String>,
    },
    SetHeroWinrates {
        winrates: HashMap<String, f32>,
    },
    /// The art fetcher stored a new image for `id` in the art directory
    ArtDownloaded {
        id: CardId,
        is_hero: bool,
    },
    /// The art fetcher has no image for `id`
    ArtMissing {
        id: CardId,
    },
    /// Load the tier tables again, from `data_dir` or the configured data directory
    ReloadTiers {
        data_dir: Option<PathBuf>,
    },
    SetRatingMethod {
        method: RatingMethod,
    },
}

enum Message {
    Control(Control),
    Located { epoch: u64, geometry: ScreenGeometry },
    NotFound { epoch: u64 },
    Frame { epoch: u64, frame: RgbaImage },
    Tiers(Arc<TierTables>),
    Shutdown,
}

/// Owns the draft session on a single task and runs its timers, screen
/// searches and art loading as background tasks
pub struct Pipeline {
    tx: mpsc::UnboundedSender<Message>,
    status_rx: watch::Receiver<SessionStatus>,
    task: JoinHandle<()>,
}

impl Pipeline {
    /// Start the coordinator. Session events are delivered on the returned receiver.
    pub fn start(
        config: &AppConfig,
        data: Arc<ArenaData>,
        index: Arc<HistogramIndex>,
        locator: Arc<ScreenLocator>,
        screens: Arc<dyn ScreenSource>,
    ) -> (Self, mpsc::UnboundedReceiver<DraftEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());

        let session = DraftSession::new(
            data,
            index.clone(),
            config.detection.clone(),
            config.timing.clone(),
            config.rating.clone(),
        );
        let coordinator = Coordinator {
            session,
            index,
            locator,
            screens,
            art_dir: config.art_dir.clone(),
            data_dir: config.data_dir.clone(),
            timing: config.timing.clone(),
            tx: tx.clone(),
            event_tx,
            status_tx,
            search: None,
            tick: None,
        };
        let task = tokio::spawn(coordinator.run(rx));
        info!("Pipeline started (art cache {})", config.art_dir.display());

        (
            Self {
                tx,
                status_rx,
                task,
            },
            event_rx,
        )
    }

    pub fn send(&self, control: Control) -> Result<()> {
        self.tx
            .send(Message::Control(control))
            .map_err(|_| anyhow!("Pipeline is not running"))
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Stop the coordinator and every task it armed
    pub async fn shutdown(self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Err(e) = self.task.await {
            warn!("Pipeline task failed: {}", e);
        }
        info!("Pipeline stopped");
    }
}

struct Coordinator {
    session: DraftSession,
    index: Arc<HistogramIndex>,
    locator: Arc<ScreenLocator>,
    screens: Arc<dyn ScreenSource>,
    art_dir: PathBuf,
    data_dir: PathBuf,
    timing: CaptureTiming,
    tx: mpsc::UnboundedSender<Message>,
    event_tx: mpsc::UnboundedSender<DraftEvent>,
    status_tx: watch::Sender<SessionStatus>,
    search: Option<JoinHandle<()>>,
    tick: Option<JoinHandle<()>>,
}

impl Coordinator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            let effects = match message {
                Message::Shutdown => break,
                Message::Control(control) => self.control(control),
                Message::Located { epoch, geometry } => self.session.geometry_found(epoch, geometry),
                Message::NotFound { epoch } => self.session.screen_not_found(epoch),
                Message::Frame { epoch, frame } => self.session.tick(epoch, &frame),
                Message::Tiers(tiers) => self.session.set_tiers(tiers),
            };
            self.apply(effects);
            let _ = self.status_tx.send(self.session.status());
        }

        cancel(&mut self.search);
        cancel(&mut self.tick);
    }

    fn control(&mut self, control: Control) -> Vec<DraftEffect> {
        debug!("Control: {:?}", control);
        let result = match control {
            Control::EnterArena => Ok(self.session.enter_arena()),
            Control::BeginDraft {
                hero,
                existing_deck,
            } => self.session.begin_draft(&hero, &existing_deck),
            Control::PickCard { code, source } => self.session.pick_card(&code, source),
            Control::LeaveArena => Ok(self.session.leave_arena()),
            Control::EndDraft => Ok(self.session.end_draft()),
            Control::Resync => self.session.resync(),
            Control::SetCardPool { codes } => Ok(self.session.set_card_pool(codes)),
            Control::SetHeroWinrates { winrates } => {
                self.session.set_hero_winrates(winrates);
                Ok(Vec::new())
            }
            Control::ArtDownloaded { id, is_hero } => {
                self.rehash(id, is_hero);
                Ok(Vec::new())
            }
            Control::ArtMissing { id } => {
                // Stays unranked until some later download
                warn!("No art available for {}", id);
                Ok(Vec::new())
            }
            Control::ReloadTiers { data_dir } => {
                self.reload_tiers(data_dir.unwrap_or_else(|| self.data_dir.clone()));
                Ok(Vec::new())
            }
            Control::SetRatingMethod { method } => Ok(self.session.set_rating_method(method)),
        };

        result.unwrap_or_else(|e| {
            warn!("Control event rejected: {}", e);
            Vec::new()
        })
    }

    fn apply(&mut self, effects: Vec<DraftEffect>) {
        for effect in effects {
            match effect {
                DraftEffect::Emit(event) => {
                    let _ = self.event_tx.send(event);
                }
                DraftEffect::StartScreenSearch { epoch, delay } => self.start_search(epoch, delay),
                DraftEffect::CancelScreenSearch => cancel(&mut self.search),
                DraftEffect::ScheduleTick { epoch, delay } => self.schedule_tick(epoch, delay),
                DraftEffect::CancelTick => cancel(&mut self.tick),
                DraftEffect::LoadArt { ids, is_hero } => self.load_art(ids, is_hero),
            }
        }
    }

    /// Search every screen after `delay`, retrying until found or the failure cap.
    /// The wait after the first failure is the longer `first_retry_delay`.
    fn start_search(&mut self, epoch: u64, delay: Duration) {
        cancel(&mut self.search);

        let locator = self.locator.clone();
        let screens = self.screens.clone();
        let tx = self.tx.clone();
        let first_retry = self.timing.first_retry_delay();
        let retry = self.timing.retry_delay();
        let cap = self.timing.locate_failure_cap.max(1);

        self.search = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            for attempt in 1..=cap {
                let locator = locator.clone();
                let screens = screens.clone();
                let found = tokio::task::spawn_blocking(move || -> Result<Option<ScreenGeometry>> {
                    let frames = screens.capture_all()?;
                    Ok(locator.locate(&frames))
                })
                .await;

                match found {
                    Ok(Ok(Some(geometry))) => {
                        let _ = tx.send(Message::Located { epoch, geometry });
                        return;
                    }
                    Ok(Ok(None)) => debug!("Screen search {}/{}: no draft screen", attempt, cap),
                    Ok(Err(e)) => warn!("Screen capture failed: {:#}", e),
                    Err(e) => warn!("Screen search task panicked: {}", e),
                }

                if attempt < cap {
                    let wait = if attempt == 1 { first_retry } else { retry };
                    tokio::time::sleep(wait).await;
                }
            }

            let _ = tx.send(Message::NotFound { epoch });
        }));
    }

    fn schedule_tick(&mut self, epoch: u64, delay: Duration) {
        cancel(&mut self.tick);

        let Some(screen) = self.session.geometry().map(|g| g.screen_index) else {
            warn!("Tick scheduled without screen geometry");
            return;
        };
        let screens = self.screens.clone();
        let tx = self.tx.clone();

        self.tick = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // An empty frame sends the session back to the screen search
            let frame = match tokio::task::spawn_blocking(move || screens.capture(screen)).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => {
                    warn!("Capture failed: {:#}", e);
                    RgbaImage::new(0, 0)
                }
                Err(e) => {
                    warn!("Capture task panicked: {}", e);
                    RgbaImage::new(0, 0)
                }
            };
            let _ = tx.send(Message::Frame { epoch, frame });
        }));
    }

    /// Hash cached art for `ids` and request whatever is not cached
    fn load_art(&self, ids: Vec<CardId>, is_hero: bool) {
        let index = self.index.clone();
        let art_dir = self.art_dir.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let missing =
                tokio::task::spawn_blocking(move || index.load_cached_art(&art_dir, &ids, is_hero))
                    .await;
            match missing {
                Ok(missing) => {
                    for id in missing {
                        let _ = event_tx.send(DraftEvent::ArtRequested { id, is_hero });
                    }
                }
                Err(e) => warn!("Art loading task failed: {}", e),
            }
        });
    }

    /// Read the tier tables off the coordinator; the session swaps them in on delivery
    fn reload_tiers(&self, data_dir: PathBuf) {
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let loaded = tokio::task::spawn_blocking(move || TierTables::load(&data_dir)).await;
            match loaded {
                Ok(Ok(tiers)) => {
                    let _ = tx.send(Message::Tiers(Arc::new(tiers)));
                }
                Ok(Err(e)) => warn!("Failed to reload tier tables: {:#}", e),
                Err(e) => warn!("Tier loading task failed: {}", e),
            }
        });
    }

    /// Re-hash a freshly downloaded image, replacing any older signature
    fn rehash(&self, id: CardId, is_hero: bool) {
        let index = self.index.clone();
        let art_dir = self.art_dir.clone();

        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || -> Result<()> {
                match arena_vision::load_art(&art_dir, &id, is_hero)? {
                    Some(img) => {
                        index.add(id.clone(), &img);
                        info!("Hashed downloaded art for {}", id);
                    }
                    None => warn!(
                        "Downloaded art for {} not found in {}",
                        id,
                        art_dir.display()
                    ),
                }
                Ok(())
            })
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to hash downloaded art: {:#}", e),
                Err(e) => warn!("Art hashing task failed: {}", e),
            }
        });
    }
}

fn cancel(handle: &mut Option<JoinHandle<()>>) {
    if let Some(h) = handle.take() {
        h.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_capture::PixelRect;
    use arena_data::{CardData, Rarity};
    use arena_state::{DraftPhase, Stage};
    use arena_vision::{LocatorConfig, SlotLayout};
    use image::{GrayImage, Rgba};
    use std::sync::Mutex;
    use tokio::time::timeout;

    const RED: Rgba<u8> = Rgba([220, 20, 20, 255]);
    const GREEN: Rgba<u8> = Rgba([20, 220, 20, 255]);
    const BLUE: Rgba<u8> = Rgba([20, 20, 220, 255]);
    const YELLOW: Rgba<u8> = Rgba([220, 220, 20, 255]);

    struct FakeScreens {
        frames: Mutex<Vec<RgbaImage>>,
    }

    impl ScreenSource for FakeScreens {
        fn capture_all(&self) -> Result<Vec<RgbaImage>> {
            Ok(self.frames.lock().unwrap().clone())
        }

        fn capture(&self, index: usize) -> Result<RgbaImage> {
            self.frames
                .lock()
                .unwrap()
                .get(index)
                .cloned()
                .ok_or_else(|| anyhow!("no screen {}", index))
        }
    }

    fn anchor_template() -> GrayImage {
        GrayImage::from_fn(16, 8, |x, y| {
            image::Luma([(((x / 2) * 3 + (y / 2) * 7) % 5 * 50) as u8])
        })
    }

    fn blank_screen() -> RgbaImage {
        RgbaImage::from_pixel(200, 120, Rgba([40, 40, 40, 255]))
    }

    /// Anchor at (90, 20); slots at x = 30, 80, 130, y = 50, 30x40
    fn draft_screen(colors: [Rgba<u8>; 3]) -> RgbaImage {
        let mut screen = blank_screen();
        for (x, y, p) in anchor_template().enumerate_pixels() {
            let v = p[0];
            screen.put_pixel(90 + x, 20 + y, Rgba([v, v, v, 255]));
        }
        for (rect, color) in [30u32, 80, 130].iter().zip(colors) {
            let rect = PixelRect::new(*rect, 50, 30, 40);
            for y in rect.y..rect.y + rect.height {
                for x in rect.x..rect.x + rect.width {
                    screen.put_pixel(x, y, color);
                }
            }
        }
        screen
    }

    fn card(code: &str, class: &str) -> CardData {
        CardData {
            code: code.to_string(),
            name: code.to_lowercase(),
            class: class.to_string(),
            rarity: Rarity::Common,
            arena: true,
        }
    }

    struct Fixture {
        pipeline: Pipeline,
        events: mpsc::UnboundedReceiver<DraftEvent>,
        index: Arc<HistogramIndex>,
        art_dir: tempfile::TempDir,
    }

    fn start(screen: RgbaImage) -> Fixture {
        let art_dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            art_dir: art_dir.path().to_path_buf(),
            timing: CaptureTiming {
                first_retry_ms: 5,
                loop_ms: 5,
                loop_after_pick_ms: 5,
                locate_retry_ms: 5,
                locate_failure_cap: 3,
            },
            ..AppConfig::default()
        };

        let data = ArenaData::with_cards([
            card("FIRE", "MAGE"),
            card("LEAF", arena_data::NEUTRAL_CLASS),
            card("WAVE", "MAGE"),
            card("SUN", "MAGE"),
        ]);
        let index = Arc::new(HistogramIndex::new());
        index.add(CardId::normal("FIRE"), &RgbaImage::from_pixel(10, 10, RED));
        index.add(CardId::normal("LEAF"), &RgbaImage::from_pixel(10, 10, GREEN));
        index.add(CardId::normal("WAVE"), &RgbaImage::from_pixel(10, 10, BLUE));

        let locator = ScreenLocator::new(
            anchor_template(),
            LocatorConfig {
                similarity_floor: 0.6,
                downscale: 1,
                reference_height: 120,
                scale_candidates: vec![1.0],
                layout: SlotLayout {
                    offsets: [(-60, 30), (-10, 30), (40, 30)],
                    size: (30, 40),
                },
            },
        );
        let screens = Arc::new(FakeScreens {
            frames: Mutex::new(vec![screen]),
        });

        let (pipeline, events) = Pipeline::start(
            &config,
            Arc::new(data),
            index.clone(),
            Arc::new(locator),
            screens,
        );
        Fixture {
            pipeline,
            events,
            index,
            art_dir,
        }
    }

    async fn wait_for(
        events: &mut mpsc::UnboundedReceiver<DraftEvent>,
        seen: &mut Vec<DraftEvent>,
        pred: impl Fn(&DraftEvent) -> bool,
    ) -> DraftEvent {
        loop {
            let event = timeout(Duration::from_secs(10), events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            seen.push(event.clone());
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_draft_cycle_end_to_end() {
        let mut f = start(draft_screen([RED, GREEN, BLUE]));
        let mut seen = Vec::new();

        f.pipeline
            .send(Control::BeginDraft {
                hero: "08".to_string(),
                existing_deck: Vec::new(),
            })
            .unwrap();

        let all = wait_for(&mut f.events, &mut seen, |e| {
            matches!(e, DraftEvent::AllDetected { .. })
        })
        .await;
        let DraftEvent::AllDetected { candidates, .. } = all else {
            unreachable!()
        };
        let codes: Vec<&str> = candidates.iter().map(|c| c.id.code.as_str()).collect();
        assert_eq!(codes, vec!["FIRE", "LEAF", "WAVE"]);
        assert!(seen
            .iter()
            .any(|e| matches!(e, DraftEvent::GeometryFound { .. })));
        assert_eq!(
            seen.iter()
                .filter(|e| matches!(e, DraftEvent::CandidateDetected { .. }))
                .count(),
            3
        );

        // UI and log parser both report the same pick
        seen.clear();
        for source in [PickSource::Speculative, PickSource::Authoritative] {
            f.pipeline
                .send(Control::PickCard {
                    code: "FIRE".to_string(),
                    source,
                })
                .unwrap();
        }
        wait_for(&mut f.events, &mut seen, |e| {
            matches!(e, DraftEvent::AllDetected { .. })
        })
        .await;
        let commits = seen
            .iter()
            .filter(|e| matches!(e, DraftEvent::PickCommitted { .. }))
            .count();
        assert_eq!(commits, 1);
        assert!(seen.contains(&DraftEvent::PickConfirmed {
            code: "FIRE".to_string()
        }));
        assert_eq!(f.pipeline.status().picks, 1);

        f.pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_art_is_requested_and_rehashed() {
        let mut f = start(draft_screen([RED, GREEN, BLUE]));
        let mut seen = Vec::new();
        f.pipeline
            .send(Control::BeginDraft {
                hero: "MAGE".to_string(),
                existing_deck: Vec::new(),
            })
            .unwrap();

        let sun = CardId::normal("SUN");
        wait_for(&mut f.events, &mut seen, |e| {
            matches!(e, DraftEvent::ArtRequested { id, is_hero: false } if *id == sun)
        })
        .await;
        assert!(!f.index.contains(&sun));

        RgbaImage::from_pixel(100, 150, YELLOW)
            .save(f.art_dir.path().join("SUN.png"))
            .unwrap();
        f.pipeline
            .send(Control::ArtDownloaded {
                id: sun.clone(),
                is_hero: false,
            })
            .unwrap();

        let mut indexed = false;
        for _ in 0..200 {
            if f.index.contains(&sun) {
                indexed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(indexed);

        f.pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_screen_not_found_reports_stall() {
        let f = start(blank_screen());
        let mut status = f.pipeline.subscribe_status();
        f.pipeline
            .send(Control::BeginDraft {
                hero: "08".to_string(),
                existing_deck: Vec::new(),
            })
            .unwrap();

        timeout(Duration::from_secs(10), status.wait_for(|s| s.screen_stalled))
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(
            f.pipeline.status().phase,
            DraftPhase::CardDraft(Stage::ScreenSearch)
        );

        // Manual pick stays available
        f.pipeline
            .send(Control::PickCard {
                code: "SUN".to_string(),
                source: PickSource::Speculative,
            })
            .unwrap();
        timeout(Duration::from_secs(10), status.wait_for(|s| s.picks == 1))
            .await
            .expect("timed out")
            .unwrap();

        f.pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_tier_reload_and_method_switch_rerate_offer() {
        let mut f = start(draft_screen([RED, GREEN, BLUE]));
        let mut seen = Vec::new();
        f.pipeline
            .send(Control::BeginDraft {
                hero: "08".to_string(),
                existing_deck: Vec::new(),
            })
            .unwrap();
        wait_for(&mut f.events, &mut seen, |e| {
            matches!(e, DraftEvent::AllDetected { best_index: None, .. })
        })
        .await;

        f.pipeline
            .send(Control::SetRatingMethod {
                method: RatingMethod::SourceA,
            })
            .unwrap();
        wait_for(&mut f.events, &mut seen, |e| {
            matches!(e, DraftEvent::AllDetected { .. })
        })
        .await;

        let tiers_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            tiers_dir.path().join("tiers_a.json"),
            r#"{"MAGE":{"FIRE":30,"WAVE":90}}"#,
        )
        .unwrap();
        f.pipeline
            .send(Control::ReloadTiers {
                data_dir: Some(tiers_dir.path().to_path_buf()),
            })
            .unwrap();

        let all = wait_for(&mut f.events, &mut seen, |e| {
            matches!(e, DraftEvent::AllDetected { .. })
        })
        .await;
        let DraftEvent::AllDetected {
            candidates,
            best_index,
        } = all
        else {
            unreachable!()
        };
        assert_eq!(best_index, Some(2));
        let combined: Vec<f64> = candidates.iter().map(|c| c.rating.combined).collect();
        assert_eq!(combined, vec![30.0, 0.0, 90.0]);

        f.pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_arena_cancels_pending_work() {
        let mut f = start(draft_screen([RED, GREEN, BLUE]));
        f.pipeline
            .send(Control::BeginDraft {
                hero: "08".to_string(),
                existing_deck: Vec::new(),
            })
            .unwrap();
        f.pipeline.send(Control::LeaveArena).unwrap();

        let mut seen = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_secs(30), f.events.recv()).await {
            seen.push(event);
        }

        assert!(seen.contains(&DraftEvent::DraftEnded));
        assert!(!seen.iter().any(|e| matches!(
            e,
            DraftEvent::GeometryFound { .. }
                | DraftEvent::CandidateDetected { .. }
                | DraftEvent::AllDetected { .. }
        )));
        let last_phase = seen.iter().rev().find_map(|e| match e {
            DraftEvent::PhaseChanged { phase } => Some(*phase),
            _ => None,
        });
        assert_eq!(last_phase, Some(DraftPhase::Idle));
        assert_eq!(f.pipeline.status().phase, DraftPhase::Idle);

        f.pipeline.shutdown().await;
    }
}
