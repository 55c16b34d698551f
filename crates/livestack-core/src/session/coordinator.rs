use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{LiveStackError, Result};
use crate::ingest::{
    candidates, classify, list_directory, FilterCache, MasterCache, Preparation, StackFilter,
};
use crate::integrate::{
    integrate_pending, IntegrationContext, IntegrationReport, MergeGuard, NoOpReporter,
    ProgressReporter,
};
use crate::services::{ImageServices, TimeoutServices};
use crate::stack::{sidecar_path, Stack, StackConfig, StackId, StackProperties};
use crate::watch::{PathWatcher, WatchRegistry};

use super::config::SessionConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CyclePhase {
    /// Fixed settle delay after the notification.
    Settling,
    /// Holds the processing lock; waiting out the settle time.
    Reserved,
}

#[derive(Clone, Copy, Debug)]
struct Cycle {
    phase: CyclePhase,
    deadline: Instant,
    initial: bool,
}

/// Why a directory cycle ended without integrating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoWatchingStacks,
    NoCandidates,
    ListingFailed,
}

/// Progress of directory cycles, as reported by [`Coordinator::poll`].
#[derive(Clone, Debug, PartialEq)]
pub enum CycleEvent {
    Skipped { dir: PathBuf, reason: SkipReason },
    /// Another cycle held the processing lock; this one was dropped.
    Contended { dir: PathBuf },
    /// The processing lock is now held for `dir`.
    Reserved { dir: PathBuf },
    Completed {
        dir: PathBuf,
        reports: Vec<(StackId, IntegrationReport)>,
    },
}

/// Owns every stack of a session and drives the directory cycles.
///
/// Cycles never block: [`Coordinator::on_directory_changed`] schedules one
/// per directory and [`Coordinator::poll`] advances those that are due.
/// At most one cycle holds the processing lock at a time, process-wide.
pub struct Coordinator {
    config: SessionConfig,
    services: Arc<dyn ImageServices>,
    watcher: Box<dyn PathWatcher>,
    reporter: Arc<dyn ProgressReporter>,
    guard: MergeGuard,
    stacks: BTreeMap<StackId, Stack>,
    next_id: u32,
    registry: WatchRegistry,
    cycles: BTreeMap<PathBuf, Cycle>,
    lock: Option<PathBuf>,
    deferred: BTreeSet<PathBuf>,
    filter_cache: FilterCache,
    masters: MasterCache,
}

fn normalize(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

impl Coordinator {
    pub fn new(
        config: SessionConfig,
        services: Arc<dyn ImageServices>,
        watcher: Box<dyn PathWatcher>,
    ) -> Self {
        let services: Arc<dyn ImageServices> = match config.service_timeout() {
            Some(timeout) => Arc::new(TimeoutServices::new(services, timeout)),
            None => services,
        };
        Self {
            config,
            services,
            watcher,
            reporter: Arc::new(NoOpReporter),
            guard: MergeGuard::default(),
            stacks: BTreeMap::new(),
            next_id: 1,
            registry: WatchRegistry::default(),
            cycles: BTreeMap::new(),
            lock: None,
            deferred: BTreeSet::new(),
            filter_cache: FilterCache::default(),
            masters: MasterCache::default(),
        }
    }

    pub fn set_reporter(&mut self, reporter: Arc<dyn ProgressReporter>) {
        self.reporter = reporter;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn services(&self) -> &dyn ImageServices {
        self.services.as_ref()
    }

    pub fn stack(&self, id: StackId) -> Option<&Stack> {
        self.stacks.get(&id)
    }

    pub fn stack_mut(&mut self, id: StackId) -> Option<&mut Stack> {
        self.stacks.get_mut(&id)
    }

    pub fn stacks(&self) -> impl Iterator<Item = &Stack> {
        self.stacks.values()
    }

    /// Directory holding the processing lock, if any.
    pub fn lock_holder(&self) -> Option<&Path> {
        self.lock.as_deref()
    }

    pub fn has_pending_cycle(&self, dir: &Path) -> bool {
        self.cycles.contains_key(&normalize(dir))
    }

    /// Earliest deadline among scheduled cycles.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.cycles.values().map(|c| c.deadline).min()
    }

    fn allocate_id(&mut self) -> StackId {
        let id = StackId(self.next_id);
        self.next_id += 1;
        id
    }

    fn get_mut(&mut self, id: StackId) -> Result<&mut Stack> {
        self.stacks.get_mut(&id).ok_or(LiveStackError::UnknownStack(id))
    }

    /// Start a stack on `reference`. The reference is prepared with the
    /// stack's own settings and becomes the first running image. An empty
    /// filter is taken from the reference's FILTER keyword.
    pub fn create_stack(&mut self, reference: &Path, config: StackConfig) -> Result<StackId> {
        let id = self.allocate_id();
        let mut stack = Stack::new(id, reference, config)?;

        let raw = self.services.read_image(stack.reference_path())?;
        if stack.config.watch.filter.is_empty() && !stack.config.watch.ignore_filter {
            stack.config.watch.filter = raw.filter();
        }
        let (masters, warnings) = self
            .masters
            .masters(&stack.config.calibration, self.services.as_ref());
        for w in warnings {
            stack.warn(w);
        }
        let prepared = Preparation {
            services: self.services.as_ref(),
            masters: &masters,
            config: &stack.config,
        }
        .prepare(stack.reference_path())?;
        stack.attach_reference(prepared)?;

        info!(
            stack = %id,
            reference = %stack.reference_path().display(),
            filter = %stack.config.watch.filter,
            "Live stack created"
        );
        self.stacks.insert(id, stack);
        Ok(id)
    }

    /// Rebuild an exported stack from its image and sidecar.
    pub fn resume_stack(&mut self, image_path: &Path) -> Result<StackId> {
        let props = StackProperties::load(&sidecar_path(image_path))?;
        let running = self.services.read_image(image_path)?;
        let id = self.allocate_id();
        let stack = Stack::from_properties(id, &props, running, image_path)?;
        info!(
            stack = %id,
            frames = stack.frames_folded(),
            watch = %stack.path_to_watch().display(),
            "Live stack resumed"
        );
        self.stacks.insert(id, stack);
        Ok(id)
    }

    /// Begin watching the stack's directory and schedule its initial pass.
    pub fn start_watching(&mut self, id: StackId, now: Instant) -> Result<()> {
        let stack = self.get_mut(id)?;
        stack.start_watching()?;
        let dir = normalize(stack.path_to_watch());
        if self.registry.register(&dir, id) {
            self.watcher.add_path(&dir)?;
        }
        self.on_directory_changed(&dir, true, now);
        Ok(())
    }

    /// Stop watching; takes effect at the next cycle.
    pub fn stop_watching(&mut self, id: StackId) -> Result<()> {
        let stack = self.get_mut(id)?;
        stack.stop_watching()?;
        let dir = normalize(stack.path_to_watch());
        if self.registry.unregister(&dir, id) {
            self.watcher.remove_path(&dir)?;
        }
        Ok(())
    }

    pub fn set_export(&mut self, id: StackId, export: bool) -> Result<()> {
        self.get_mut(id)?.set_export(export);
        Ok(())
    }

    /// Stop a stack for good and hand it back. Exported stacks are
    /// persisted, others discarded.
    pub fn stop_stack(&mut self, id: StackId) -> Result<Stack> {
        if self.get_mut(id)?.is_watching() {
            self.stop_watching(id)?;
        }
        let mut stack = self
            .stacks
            .remove(&id)
            .ok_or(LiveStackError::UnknownStack(id))?;
        stack.stop(self.services.as_ref())?;
        Ok(stack)
    }

    /// Stop every stack, returning them in id order.
    pub fn stop_all(&mut self) -> Vec<Result<Stack>> {
        let ids: Vec<StackId> = self.stacks.keys().copied().collect();
        ids.into_iter().map(|id| self.stop_stack(id)).collect()
    }

    /// A change was seen in `dir`. Schedules a cycle unless one is already
    /// pending for the directory.
    pub fn on_directory_changed(&mut self, dir: &Path, initial: bool, now: Instant) {
        let dir = normalize(dir);
        if !self.registry.contains(&dir) {
            debug!(dir = %dir.display(), "Change in unwatched directory");
            return;
        }
        if self.cycles.contains_key(&dir) {
            return;
        }
        debug!(dir = %dir.display(), initial, "Directory cycle scheduled");
        self.cycles.insert(
            dir,
            Cycle {
                phase: CyclePhase::Settling,
                deadline: now + self.config.fixed_settle(),
                initial,
            },
        );
    }

    /// Advance every cycle whose deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Vec<CycleEvent> {
        let mut events = Vec::new();
        while let Some((dir, cycle)) = self.next_due(now) {
            match cycle.phase {
                CyclePhase::Settling => self.reserve(dir, cycle, now, &mut events),
                CyclePhase::Reserved => self.run_cycle(dir, now, &mut events),
            }
        }
        events
    }

    fn next_due(&self, now: Instant) -> Option<(PathBuf, Cycle)> {
        self.cycles
            .iter()
            .filter(|(_, c)| c.deadline <= now)
            .min_by_key(|(_, c)| c.deadline)
            .map(|(d, c)| (d.clone(), *c))
    }

    fn fitting_stacks(&self, dir: &Path) -> Vec<StackId> {
        self.registry
            .stacks_for(dir)
            .iter()
            .copied()
            .filter(|id| self.stacks.get(id).is_some_and(Stack::is_watching))
            .collect()
    }

    /// Number of files in `dir` that any of `fitting` could take.
    fn candidate_count(&self, dir: &Path, fitting: &[StackId]) -> Result<usize> {
        let listing = list_directory(dir)?;
        let (known, filters) = stack_views(&self.stacks, fitting);
        Ok(candidates(&listing, &known, &filters).len())
    }

    /// New files of `dir` per fitting stack.
    fn assign(&mut self, dir: &Path, fitting: &[StackId]) -> Result<BTreeMap<StackId, Vec<String>>> {
        let listing = list_directory(dir)?;
        let (known, filters) = stack_views(&self.stacks, fitting);
        let services = self.services.as_ref();
        let cache = &mut self.filter_cache;
        Ok(classify(&listing, &known, &filters, |name| {
            cache.filter(&dir.join(name), services)
        }))
    }

    fn reserve(&mut self, dir: PathBuf, cycle: Cycle, now: Instant, events: &mut Vec<CycleEvent>) {
        let fitting = self.fitting_stacks(&dir);
        if fitting.is_empty() {
            self.cycles.remove(&dir);
            events.push(CycleEvent::Skipped {
                dir,
                reason: SkipReason::NoWatchingStacks,
            });
            return;
        }

        let count = match self.candidate_count(&dir, &fitting) {
            Ok(n) => n,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot list directory");
                self.cycles.remove(&dir);
                events.push(CycleEvent::Skipped {
                    dir,
                    reason: SkipReason::ListingFailed,
                });
                return;
            }
        };
        if count == 0 {
            self.cycles.remove(&dir);
            events.push(CycleEvent::Skipped {
                dir,
                reason: SkipReason::NoCandidates,
            });
            return;
        }

        let busy = self.lock.is_some() || self.stacks.values().any(Stack::is_processing_files);
        if busy {
            self.cycles.remove(&dir);
            let holder = self
                .lock
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            for id in &fitting {
                if let Some(stack) = self.stacks.get_mut(id) {
                    stack.warn(format!(
                        "{count} new file(s) waiting; another stack is processing {holder}"
                    ));
                }
            }
            if self.config.rescan_after_contention {
                self.deferred.insert(dir.clone());
            }
            events.push(CycleEvent::Contended { dir });
            return;
        }

        let settle = if cycle.initial {
            Duration::ZERO
        } else {
            self.config.settle_time()
        };
        debug!(dir = %dir.display(), candidates = count, "Processing lock reserved");
        self.lock = Some(dir.clone());
        self.cycles.insert(
            dir.clone(),
            Cycle {
                phase: CyclePhase::Reserved,
                deadline: now + settle,
                initial: cycle.initial,
            },
        );
        events.push(CycleEvent::Reserved { dir });
    }

    fn run_cycle(&mut self, dir: PathBuf, now: Instant, events: &mut Vec<CycleEvent>) {
        self.cycles.remove(&dir);
        self.filter_cache.clear();

        let fitting = self.fitting_stacks(&dir);
        let assigned = match self.assign(&dir, &fitting) {
            Ok(a) => a,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot list directory");
                BTreeMap::new()
            }
        };

        for (id, names) in &assigned {
            if let Some(stack) = self.stacks.get_mut(id) {
                let queued = names.iter().filter(|n| stack.enqueue(n)).count();
                debug!(stack = %id, queued, "Files classified");
            }
        }

        let mut reports = Vec::new();
        for id in fitting {
            let Some(stack) = self.stacks.get_mut(&id) else {
                continue;
            };
            if stack.new_files().is_empty() {
                continue;
            }
            let (masters, warnings) = self
                .masters
                .masters(&stack.config.calibration, self.services.as_ref());
            for w in warnings {
                stack.warn(w);
            }
            let ctx = IntegrationContext {
                services: self.services.as_ref(),
                masters: &masters,
                guard: self.guard,
                reporter: self.reporter.as_ref(),
            };
            match integrate_pending(stack, &ctx) {
                Ok(report) => reports.push((id, report)),
                Err(e) => stack.warn(format!("Integration aborted: {e}")),
            }
        }

        self.lock = None;
        self.filter_cache.clear();
        events.push(CycleEvent::Completed { dir, reports });

        let deferred = std::mem::take(&mut self.deferred);
        for d in deferred {
            self.on_directory_changed(&d, false, now);
        }
    }
}

/// Names already known to any of `ids` (processed or ignored) and the
/// classifier view of each stack.
fn stack_views<'a>(
    stacks: &'a BTreeMap<StackId, Stack>,
    ids: &[StackId],
) -> (HashSet<&'a str>, Vec<StackFilter<'a>>) {
    let fitting: Vec<&Stack> = ids.iter().filter_map(|id| stacks.get(id)).collect();
    let known = fitting
        .iter()
        .flat_map(|s| s.processed_files().iter().chain(s.ignored_files()))
        .map(String::as_str)
        .collect();
    let filters = fitting
        .iter()
        .map(|s| StackFilter {
            id: s.id(),
            filter: &s.config.watch.filter,
            ignore_filter: s.config.watch.ignore_filter,
            extension: s.file_extension(),
        })
        .collect();
    (known, filters)
}
