use arena_advisor::{DeckAverages, RatingConfig, RatingEngine, RatingMethod};
use arena_data::{expand_premium, find_hero, hero_identities, ArenaData, CardId, Hero, TierTables};
use arena_vision::{CandidateMatcher, HistogramIndex, ScreenGeometry};
use image::RgbaImage;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregator::SLOT_COUNT;
use crate::error::{DraftError, Result};
use crate::{
    CaptureTiming, DetectionAggregator, DetectionConfig, DraftCandidate, DraftEffect, DraftEvent,
    DraftPhase, HeroOffer, PickSource, SlotOutcome, Stage,
};

/// Snapshot of the session for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub phase: DraftPhase,
    pub hero: Option<String>,
    pub class: Option<String>,
    pub picks: usize,
    pub screen_stalled: bool,
    pub stalled_slots: [bool; SLOT_COUNT],
    pub geometry: Option<ScreenGeometry>,
    pub averages: DeckAverages,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: DraftPhase::Idle,
            hero: None,
            class: None,
            picks: 0,
            screen_stalled: false,
            stalled_slots: [false; SLOT_COUNT],
            geometry: None,
            averages: DeckAverages::default(),
        }
    }
}

/// The draft state machine.
///
/// Pure and single-threaded: every input returns the effects the driver has to
/// carry out (emit events, arm or cancel timers, load art). Results of timers
/// and background searches come back tagged with the epoch they were started
/// with; anything that no longer matches the current epoch is dropped.
pub struct DraftSession {
    data: Arc<ArenaData>,
    matcher: CandidateMatcher,
    rating: RatingEngine,
    timing: CaptureTiming,
    phase: DraftPhase,
    hero: Option<&'static Hero>,
    picked: Vec<String>,
    hero_pool: Vec<CardId>,
    pool: Vec<CardId>,
    custom_pool: Option<Vec<String>>,
    aggregator: DetectionAggregator,
    geometry: Option<ScreenGeometry>,
    locate_epoch: u64,
    tick_epoch: u64,
    screen_stalled: bool,
    stalled_slots: [bool; SLOT_COUNT],
    offer: Option<Vec<DraftCandidate>>,
    last_commit: Option<String>,
    /// Speculative commits the log has not reported yet, oldest first
    unconfirmed: VecDeque<String>,
    hero_winrates: HashMap<String, f32>,
}

impl DraftSession {
    pub fn new(
        data: Arc<ArenaData>,
        index: Arc<HistogramIndex>,
        detection: DetectionConfig,
        timing: CaptureTiming,
        rating: RatingConfig,
    ) -> Self {
        let matcher = CandidateMatcher::new(index, detection.max_candidates);
        let rating = RatingEngine::new(rating, Arc::new(data.tiers.clone()));
        Self {
            data,
            matcher,
            rating,
            timing,
            phase: DraftPhase::Idle,
            hero: None,
            picked: Vec::new(),
            hero_pool: hero_identities(),
            pool: Vec::new(),
            custom_pool: None,
            aggregator: DetectionAggregator::new(detection),
            geometry: None,
            locate_epoch: 0,
            tick_epoch: 0,
            screen_stalled: false,
            stalled_slots: [false; SLOT_COUNT],
            offer: None,
            last_commit: None,
            unconfirmed: VecDeque::new(),
            hero_winrates: HashMap::new(),
        }
    }

    pub fn phase(&self) -> DraftPhase {
        self.phase
    }

    pub fn hero(&self) -> Option<&'static Hero> {
        self.hero
    }

    pub fn picked(&self) -> &[String] {
        &self.picked
    }

    pub fn geometry(&self) -> Option<&ScreenGeometry> {
        self.geometry.as_ref()
    }

    pub fn aggregator(&self) -> &DetectionAggregator {
        &self.aggregator
    }

    pub fn index(&self) -> &Arc<HistogramIndex> {
        self.matcher.index()
    }

    /// Candidates of the last completed card offer
    pub fn offer(&self) -> Option<&[DraftCandidate]> {
        self.offer.as_deref()
    }

    /// Identities classified in the current phase
    pub fn legal_identities(&self) -> &[CardId] {
        match self.phase {
            DraftPhase::HeroDraft(_) => &self.hero_pool,
            DraftPhase::CardDraft(_) => &self.pool,
            DraftPhase::Idle | DraftPhase::Ending => &[],
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            hero: self.hero.map(|h| h.id.to_string()),
            class: self.hero.map(|h| h.class.to_string()),
            picks: self.picked.len(),
            screen_stalled: self.screen_stalled,
            stalled_slots: self.stalled_slots,
            geometry: self.geometry.clone(),
            averages: self.rating.averages(),
        }
    }

    /// The player entered the arena screen: recognise the offered heroes
    pub fn enter_arena(&mut self) -> Vec<DraftEffect> {
        if self.phase != DraftPhase::Idle {
            debug!("enterArena ignored in {:?}", self.phase);
            return Vec::new();
        }

        info!("Entering arena: hero draft");
        self.reset_cycle();
        self.geometry = None;
        self.screen_stalled = false;

        let mut effects = vec![DraftEffect::LoadArt {
            ids: self.hero_pool.clone(),
            is_hero: true,
        }];
        self.set_phase(DraftPhase::HeroDraft(Stage::ScreenSearch), &mut effects);
        effects.push(self.start_search(Duration::ZERO));
        effects
    }

    /// A hero was picked (or a draft is resumed): start recognising cards.
    ///
    /// `existing_deck` seeds the picked list and the deck averages. Repeating the
    /// call for the hero already being drafted changes nothing.
    pub fn begin_draft(&mut self, hero: &str, existing_deck: &[String]) -> Result<Vec<DraftEffect>> {
        let hero = find_hero(hero).ok_or_else(|| DraftError::UnknownHero(hero.to_string()))?;

        if matches!(self.phase, DraftPhase::CardDraft(_)) && self.hero == Some(hero) {
            debug!("beginDraft for {} already in progress", hero.class);
            return Ok(Vec::new());
        }

        let mut effects = self.cancel_timers();
        if matches!(self.phase, DraftPhase::CardDraft(_)) {
            info!("Switching draft hero to {}", hero.class);
        }

        self.hero = Some(hero);
        self.picked = existing_deck.to_vec();
        self.pool = self.build_pool(hero.class);
        self.reset_cycle();
        self.geometry = None;
        self.screen_stalled = false;
        self.last_commit = None;
        self.unconfirmed.clear();
        let averages = self.rating.start_draft(hero.class, existing_deck);

        info!(
            "Draft started: {} ({}), {} picked, {} legal identities",
            hero.class,
            hero.id,
            self.picked.len(),
            self.pool.len()
        );

        effects.push(DraftEffect::Emit(DraftEvent::DraftStarted {
            hero: hero.id.to_string(),
            class: hero.class.to_string(),
            picked: self.picked.len(),
        }));
        effects.push(DraftEffect::Emit(DraftEvent::DeckAverages { averages }));
        effects.push(DraftEffect::LoadArt {
            ids: self.pool.clone(),
            is_hero: false,
        });
        self.set_phase(DraftPhase::CardDraft(Stage::ScreenSearch), &mut effects);
        effects.push(self.start_search(Duration::ZERO));
        Ok(effects)
    }

    /// Replace the legal card pool with an externally supplied list of codes.
    ///
    /// The pool holds until the draft ends. Mid-cycle, slot evidence gathered
    /// against the old pool is thrown away and capture restarts.
    pub fn set_card_pool(&mut self, codes: Vec<String>) -> Vec<DraftEffect> {
        info!("Card pool set to {} code(s)", codes.len());
        self.custom_pool = Some(codes);

        let Some(hero) = self.hero else {
            return Vec::new();
        };
        let DraftPhase::CardDraft(stage) = self.phase else {
            return Vec::new();
        };
        self.pool = self.build_pool(hero.class);
        self.reset_cycle();

        let mut effects = vec![DraftEffect::LoadArt {
            ids: self.pool.clone(),
            is_hero: false,
        }];
        if stage != Stage::ScreenSearch && self.geometry.is_some() {
            effects.push(DraftEffect::CancelTick);
            self.set_phase(DraftPhase::CardDraft(Stage::Capturing), &mut effects);
            effects.push(self.schedule_tick(self.timing.loop_delay()));
        }
        effects
    }

    /// Win rates shown next to offered heroes, keyed by class
    pub fn set_hero_winrates(&mut self, winrates: HashMap<String, f32>) {
        self.hero_winrates = winrates
            .into_iter()
            .map(|(class, rate)| (class.to_ascii_uppercase(), rate))
            .collect();
    }

    /// Swap in refreshed tier tables. A recognised offer is rated again.
    pub fn set_tiers(&mut self, tiers: Arc<TierTables>) -> Vec<DraftEffect> {
        info!("Tier tables refreshed");
        self.rating.set_tiers(tiers);
        self.rerate_offer()
    }

    pub fn set_rating_method(&mut self, method: RatingMethod) -> Vec<DraftEffect> {
        self.rating.set_method(method);
        self.rerate_offer()
    }

    pub fn geometry_found(&mut self, epoch: u64, geometry: ScreenGeometry) -> Vec<DraftEffect> {
        if !self.search_is_current(epoch) {
            debug!("Discarding stale screen geometry (epoch {})", epoch);
            return Vec::new();
        }

        info!(
            "Draft screen found on screen {} (scale {:.2}, confidence {:.3})",
            geometry.screen_index, geometry.scale, geometry.confidence
        );
        self.geometry = Some(geometry.clone());
        self.screen_stalled = false;

        let mut effects = vec![DraftEffect::Emit(DraftEvent::GeometryFound { geometry })];
        self.set_phase(self.phase.with_stage(Stage::Capturing), &mut effects);
        effects.push(self.schedule_tick(self.timing.loop_delay()));
        effects
    }

    /// The screen search gave up. The session keeps waiting for a resync or a manual pick.
    pub fn screen_not_found(&mut self, epoch: u64) -> Vec<DraftEffect> {
        if !self.search_is_current(epoch) {
            debug!("Discarding stale screen search failure (epoch {})", epoch);
            return Vec::new();
        }
        warn!("Draft screen not found");
        self.screen_stalled = true;
        vec![DraftEffect::Emit(DraftEvent::ScreenNotFound)]
    }

    /// Drop the screen geometry and search again
    pub fn resync(&mut self) -> Result<Vec<DraftEffect>> {
        if self.phase.stage().is_none() {
            return Err(DraftError::InvalidPhase {
                op: "resync",
                phase: self.phase,
            });
        }

        info!("Resync requested");
        let mut effects = self.cancel_timers();
        self.geometry = None;
        self.screen_stalled = false;
        self.reset_cycle();
        self.set_phase(self.phase.with_stage(Stage::ScreenSearch), &mut effects);
        effects.push(self.start_search(Duration::ZERO));
        Ok(effects)
    }

    /// One capture iteration over a screenshot of the geometry's screen
    pub fn tick(&mut self, epoch: u64, frame: &RgbaImage) -> Vec<DraftEffect> {
        if epoch != self.tick_epoch || self.phase.stage() != Some(Stage::Capturing) {
            debug!("Discarding stale capture tick (epoch {})", epoch);
            return Vec::new();
        }
        let Some(geometry) = self.geometry.clone() else {
            return self.geometry_lost();
        };
        if !geometry
            .rects
            .iter()
            .all(|r| r.fits(frame.width(), frame.height()))
        {
            warn!(
                "Captured frame {}x{} no longer holds the card slots",
                frame.width(),
                frame.height()
            );
            return self.geometry_lost();
        }

        let legal: &[CardId] = match self.phase {
            DraftPhase::HeroDraft(_) => &self.hero_pool,
            _ => &self.pool,
        };
        let mut effects = Vec::new();
        for slot in self.aggregator.pending_slots() {
            let region = arena_capture::crop_rect(frame, &geometry.rects[slot]);
            let ranked = self.matcher.classify(&region, legal);
            match self.aggregator.ingest(slot, ranked) {
                Ok(SlotOutcome::Stalled) => {
                    self.stalled_slots[slot] = true;
                    effects.push(DraftEffect::Emit(DraftEvent::SlotStalled { slot }));
                }
                Ok(_) => {}
                Err(e) => warn!("{}", e),
            }
        }

        if self.aggregator.all_detected() {
            self.finish_cycle(&mut effects);
        } else {
            effects.push(self.schedule_tick(self.timing.loop_delay()));
        }
        effects
    }

    /// Commit a pick by card code, or by slot index ("0", "1", "2") to take
    /// whatever that slot currently holds.
    ///
    /// A second pick of the card just committed, before the next offer has been
    /// recognised, is ignored. An authoritative pick that matches an earlier
    /// speculative commit only confirms it, whenever it arrives.
    pub fn pick_card(&mut self, key: &str, source: PickSource) -> Result<Vec<DraftEffect>> {
        if !matches!(self.phase, DraftPhase::CardDraft(_)) {
            return Err(DraftError::InvalidPhase {
                op: "pickCard",
                phase: self.phase,
            });
        }

        let code = self.resolve_pick(key.trim())?;
        if source == PickSource::Authoritative {
            if let Some(pos) = self.unconfirmed.iter().position(|c| *c == code) {
                self.unconfirmed.remove(pos);
                debug!("Pick of {} confirmed", code);
                return Ok(vec![DraftEffect::Emit(DraftEvent::PickConfirmed { code })]);
            }
        }
        if self.last_commit.as_deref() == Some(code.as_str()) {
            debug!("Duplicate pick of {} ignored", code);
            return Ok(Vec::new());
        }
        if source == PickSource::Speculative {
            self.unconfirmed.push_back(code.clone());
        }
        Ok(self.commit(code))
    }

    /// The authoritative end of the draft
    pub fn end_draft(&mut self) -> Vec<DraftEffect> {
        self.finish("endDraft")
    }

    /// The player left the arena screen, possibly mid-draft
    pub fn leave_arena(&mut self) -> Vec<DraftEffect> {
        self.finish("leaveArena")
    }

    fn finish(&mut self, op: &str) -> Vec<DraftEffect> {
        if self.phase == DraftPhase::Idle {
            debug!("{} ignored while idle", op);
            return Vec::new();
        }

        info!("{}: draft ended after {} pick(s)", op, self.picked.len());
        let mut effects = self.cancel_timers();
        self.set_phase(DraftPhase::Ending, &mut effects);
        effects.push(DraftEffect::Emit(DraftEvent::DraftEnded));

        self.hero = None;
        self.picked.clear();
        self.pool.clear();
        self.custom_pool = None;
        self.geometry = None;
        self.screen_stalled = false;
        self.last_commit = None;
        self.unconfirmed.clear();
        self.reset_cycle();

        self.set_phase(DraftPhase::Idle, &mut effects);
        effects
    }

    fn resolve_pick(&self, key: &str) -> Result<String> {
        let Ok(slot) = key.parse::<usize>() else {
            return Ok(key.to_string());
        };
        let state = self
            .aggregator
            .slot(slot)
            .ok_or(DraftError::InvalidSlot(slot))?;
        state
            .detected()
            .cloned()
            .or_else(|| state.best_candidate())
            .map(|c| c.id.code)
            .ok_or(DraftError::SlotUndetermined(slot))
    }

    fn commit(&mut self, code: String) -> Vec<DraftEffect> {
        self.picked.push(code.clone());
        let averages = self.rating.record_pick(&code);
        info!("Pick {}: {}", self.picked.len(), self.data.name(&code));

        let mut effects = vec![
            DraftEffect::Emit(DraftEvent::PickCommitted {
                code: code.clone(),
                pick_number: self.picked.len(),
            }),
            DraftEffect::Emit(DraftEvent::DeckAverages { averages }),
        ];
        self.last_commit = Some(code);

        let searching = self.phase.stage() == Some(Stage::ScreenSearch);
        self.reset_cycle();
        effects.push(DraftEffect::CancelTick);
        self.tick_epoch += 1;

        if self.geometry.is_some() {
            self.set_phase(DraftPhase::CardDraft(Stage::Capturing), &mut effects);
            effects.push(self.schedule_tick(self.timing.after_pick_delay()));
        } else if !searching {
            self.set_phase(DraftPhase::CardDraft(Stage::ScreenSearch), &mut effects);
            effects.push(self.start_search(Duration::ZERO));
        }
        effects
    }

    fn finish_cycle(&mut self, effects: &mut Vec<DraftEffect>) {
        match self.phase {
            DraftPhase::CardDraft(_) => {
                let data = self.data.clone();
                let changed = self.aggregator.apply_rarity_consensus(|code| data.rarity(code));
                if !changed.is_empty() {
                    debug!("Rarity consensus changed slot(s) {:?}", changed);
                }
                let Some(winners) = self.aggregator.winners() else {
                    return;
                };

                let offer = self.rating.rate_offer([
                    &winners[0].id.code,
                    &winners[1].id.code,
                    &winners[2].id.code,
                ]);
                let candidates: Vec<DraftCandidate> = winners
                    .into_iter()
                    .zip(offer.ratings)
                    .enumerate()
                    .map(|(slot, (winner, rating))| DraftCandidate {
                        slot,
                        id: winner.id,
                        distance: winner.distance,
                        rating,
                    })
                    .collect();

                for c in &candidates {
                    effects.push(DraftEffect::Emit(DraftEvent::CandidateDetected {
                        slot: c.slot,
                        id: c.id.clone(),
                        rating: c.rating.combined,
                    }));
                }
                effects.push(DraftEffect::Emit(DraftEvent::AllDetected {
                    candidates: candidates.clone(),
                    best_index: offer.best_index,
                }));
                self.offer = Some(candidates);
                self.last_commit = None;
            }
            DraftPhase::HeroDraft(_) => {
                let Some(winners) = self.aggregator.winners() else {
                    return;
                };
                let heroes = winners
                    .into_iter()
                    .enumerate()
                    .map(|(slot, winner)| {
                        let class = find_hero(&winner.id.code)
                            .map(|h| h.class.to_string())
                            .unwrap_or_default();
                        HeroOffer {
                            slot,
                            winrate: self.hero_winrates.get(&class).copied(),
                            code: winner.id.code,
                            class,
                            distance: winner.distance,
                        }
                    })
                    .collect();
                effects.push(DraftEffect::Emit(DraftEvent::HeroesOffered { heroes }));
            }
            DraftPhase::Idle | DraftPhase::Ending => return,
        }
        self.set_phase(self.phase.with_stage(Stage::AllDetected), effects);
    }

    fn rerate_offer(&mut self) -> Vec<DraftEffect> {
        if self.phase != DraftPhase::CardDraft(Stage::AllDetected) {
            return Vec::new();
        }
        let Some(mut candidates) = self.offer.take() else {
            return Vec::new();
        };
        if candidates.len() != SLOT_COUNT {
            self.offer = Some(candidates);
            return Vec::new();
        }

        let offer = self.rating.rate_offer([
            &candidates[0].id.code,
            &candidates[1].id.code,
            &candidates[2].id.code,
        ]);
        for (candidate, rating) in candidates.iter_mut().zip(offer.ratings) {
            candidate.rating = rating;
        }
        let effects = vec![DraftEffect::Emit(DraftEvent::AllDetected {
            candidates: candidates.clone(),
            best_index: offer.best_index,
        })];
        self.offer = Some(candidates);
        effects
    }

    fn geometry_lost(&mut self) -> Vec<DraftEffect> {
        self.geometry = None;
        let mut effects = Vec::new();
        self.set_phase(self.phase.with_stage(Stage::ScreenSearch), &mut effects);
        effects.push(self.start_search(self.timing.retry_delay()));
        effects
    }

    fn build_pool(&self, class: &str) -> Vec<CardId> {
        match &self.custom_pool {
            Some(codes) => expand_premium(codes),
            None => self.data.legal_identities(class),
        }
    }

    fn reset_cycle(&mut self) {
        self.aggregator.reset();
        self.stalled_slots = [false; SLOT_COUNT];
        self.offer = None;
    }

    fn set_phase(&mut self, phase: DraftPhase, effects: &mut Vec<DraftEffect>) {
        if self.phase != phase {
            debug!("Phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            effects.push(DraftEffect::Emit(DraftEvent::PhaseChanged { phase }));
        }
    }

    fn search_is_current(&self, epoch: u64) -> bool {
        epoch == self.locate_epoch && self.phase.stage() == Some(Stage::ScreenSearch)
    }

    fn start_search(&mut self, delay: Duration) -> DraftEffect {
        self.locate_epoch += 1;
        DraftEffect::StartScreenSearch {
            epoch: self.locate_epoch,
            delay,
        }
    }

    fn schedule_tick(&mut self, delay: Duration) -> DraftEffect {
        self.tick_epoch += 1;
        DraftEffect::ScheduleTick {
            epoch: self.tick_epoch,
            delay,
        }
    }

    fn cancel_timers(&mut self) -> Vec<DraftEffect> {
        self.locate_epoch += 1;
        self.tick_epoch += 1;
        vec![DraftEffect::CancelTick, DraftEffect::CancelScreenSearch]
    }
}
