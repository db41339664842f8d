// Supplier groups: a projection of the supplier, product and solution caches.
//
// Groups are never patched in place. Any change to one of the three inputs
// recomputes every group from the current rows. While a fast search is
// running, a poller refreshes suppliers and products on a fixed interval in
// case the feed misses the results of the long-running job.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use scout_common::types::{BriefId, Product, Solution, Supplier};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::backend::Backend;
use crate::channel::ChannelManager;
use crate::collection::{CollectionSnapshot, CollectionSync};
use crate::error::Result;
use crate::lock;
use crate::solutions::SolutionSync;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolutionRef {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SupplierScores {
    pub best: Option<f64>,
    pub average: Option<f64>,
}

/// One supplier with everything matched to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplierGroup {
    pub supplier: Supplier,
    pub solutions: Vec<SolutionRef>,
    pub products: Vec<Product>,
    pub scores: SupplierScores,
    /// Explanation attached to the best-scoring product.
    pub ai_explanation: Option<String>,
    pub total_products: usize,
}

/// Group supplier rows with their products and solutions.
///
/// Only products whose supplier is present are counted. Groups are ordered by
/// best score, highest first and unscored last, then by company name.
pub fn group_suppliers(
    suppliers: &[Supplier],
    products: &[Product],
    solutions: &[Solution],
) -> Vec<SupplierGroup> {
    let titles: HashMap<&str, &str> =
        solutions.iter().map(|solution| (solution.id.as_str(), solution.title.as_str())).collect();
    let mut by_supplier: HashMap<&str, Vec<&Product>> = HashMap::new();
    for product in products {
        by_supplier.entry(product.supplier_id.as_str()).or_default().push(product);
    }

    let mut seen = BTreeSet::new();
    let mut groups: Vec<SupplierGroup> = suppliers
        .iter()
        .filter(|supplier| seen.insert(supplier.id.as_str()))
        .map(|supplier| {
            let products: Vec<Product> = by_supplier
                .get(supplier.id.as_str())
                .map(|rows| rows.iter().map(|row| (*row).clone()).collect())
                .unwrap_or_default();

            let solution_ids: BTreeSet<&str> = supplier
                .solution_id
                .as_deref()
                .into_iter()
                .chain(products.iter().filter_map(|product| product.solution_id.as_deref()))
                .collect();
            let solutions = solution_ids
                .into_iter()
                .map(|id| SolutionRef {
                    id: id.to_string(),
                    title: titles.get(id).map(|title| title.to_string()),
                })
                .collect();

            let scored: Vec<&Product> =
                products.iter().filter(|product| product.ai_score.is_some()).collect();
            let best = scored
                .iter()
                .copied()
                .max_by(|a, b| a.ai_score.unwrap_or_default().total_cmp(&b.ai_score.unwrap_or_default()));
            let scores = SupplierScores {
                best: best.and_then(|product| product.ai_score),
                average: (!scored.is_empty()).then(|| {
                    scored.iter().filter_map(|product| product.ai_score).sum::<f64>() / scored.len() as f64
                }),
            };
            let ai_explanation = best
                .and_then(|product| product.ai_explanation.clone())
                .or_else(|| products.iter().find_map(|product| product.ai_explanation.clone()));

            SupplierGroup {
                supplier: supplier.clone(),
                solutions,
                total_products: products.len(),
                products,
                scores,
                ai_explanation,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        let by_score = match (a.scores.best, b.scores.best) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        by_score.then_with(|| a.supplier.company_name.cmp(&b.supplier.company_name))
    });
    groups
}

struct SupplierShared {
    suppliers: CollectionSync<Supplier>,
    products: CollectionSync<Product>,
    solutions: watch::Receiver<CollectionSnapshot<Solution>>,
    groups: watch::Sender<Vec<SupplierGroup>>,
    poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl SupplierShared {
    fn compute(&self) -> Vec<SupplierGroup> {
        let solutions = self.solutions.borrow().rows.clone();
        group_suppliers(&self.suppliers.rows(), &self.products.rows(), &solutions)
    }

    fn recompute(&self) {
        let groups = self.compute();
        self.groups.send_if_modified(|current| {
            if *current == groups {
                return false;
            }
            *current = groups;
            true
        });
    }

    async fn poll_once(&self) {
        let (suppliers, products) = tokio::join!(self.suppliers.refresh(), self.products.refresh());
        for (entity, outcome) in [("suppliers", suppliers), ("products", products)] {
            if let Err(error) = outcome {
                debug!(entity, %error, "supplier poll failed");
            }
        }
    }
}

impl Drop for SupplierShared {
    fn drop(&mut self) {
        if let Some(poller) = lock(&self.poller).take() {
            poller.abort();
        }
    }
}

/// Live supplier groups for the mounted brief.
#[derive(Clone)]
pub struct SupplierSync {
    shared: Arc<SupplierShared>,
}

impl SupplierSync {
    /// Must be called inside a tokio runtime. Polling follows the search
    /// activity reported by `solutions`.
    pub fn new(
        backend: Arc<dyn Backend>,
        channels: ChannelManager,
        solutions: &SolutionSync,
        poll_interval: Duration,
    ) -> Self {
        let shared = Arc::new(SupplierShared {
            suppliers: CollectionSync::new(Arc::clone(&backend), channels.clone()),
            products: CollectionSync::new(backend, channels),
            solutions: solutions.subscribe(),
            groups: watch::channel(Vec::new()).0,
            poll_interval,
            poller: Mutex::new(None),
        });
        let sync = Self { shared };
        sync.spawn_watcher(solutions.watch_search_active());
        sync
    }

    pub fn suppliers(&self) -> &CollectionSync<Supplier> {
        &self.shared.suppliers
    }

    pub fn products(&self) -> &CollectionSync<Product> {
        &self.shared.products
    }

    pub async fn mount(&self, brief_id: BriefId) -> Result<()> {
        let (suppliers, products) = tokio::join!(
            self.shared.suppliers.mount(brief_id.clone()),
            self.shared.products.mount(brief_id)
        );
        self.shared.recompute();
        suppliers.and(products)
    }

    pub async fn unmount(&self) {
        self.set_search_active(false);
        tokio::join!(self.shared.suppliers.unmount(), self.shared.products.unmount());
        self.shared.recompute();
    }

    /// Re-fetch both collections now.
    pub async fn refresh(&self) {
        self.shared.poll_once().await;
        self.shared.recompute();
    }

    /// Current groups, computed from the caches as they are now.
    pub fn groups(&self) -> Vec<SupplierGroup> {
        self.shared.compute()
    }

    pub fn watch_groups(&self) -> watch::Receiver<Vec<SupplierGroup>> {
        self.shared.groups.subscribe()
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.shared.poller).as_ref().is_some_and(|poller| !poller.is_finished())
    }

    /// Start or stop the interval poll.
    pub fn set_search_active(&self, active: bool) {
        let mut poller = lock(&self.shared.poller);
        if !active {
            if let Some(task) = poller.take() {
                task.abort();
                debug!("supplier poll stopped");
            }
            return;
        }
        if poller.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let period = self.shared.poll_interval;
        let weak = Arc::downgrade(&self.shared);
        debug!(?period, "supplier poll started");
        *poller = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(shared) = weak.upgrade() else { return };
                if shared.suppliers.scope().is_none() {
                    continue;
                }
                shared.poll_once().await;
                shared.recompute();
            }
        }));
    }

    fn spawn_watcher(&self, mut search_active: watch::Receiver<bool>) {
        let weak: Weak<SupplierShared> = Arc::downgrade(&self.shared);
        let mut suppliers = self.shared.suppliers.version();
        let mut products = self.shared.products.version();
        let mut solutions = self.shared.solutions.clone();
        if *search_active.borrow_and_update() {
            self.set_search_active(true);
        }

        tokio::spawn(async move {
            let mut solutions_open = true;
            let mut search_open = true;
            loop {
                tokio::select! {
                    changed = suppliers.changed() => if changed.is_err() { return },
                    changed = products.changed() => if changed.is_err() { return },
                    changed = solutions.changed(), if solutions_open => {
                        solutions_open = changed.is_ok();
                    }
                    changed = search_active.changed(), if search_open => {
                        if changed.is_err() {
                            search_open = false;
                            continue;
                        }
                        let active = *search_active.borrow_and_update();
                        let Some(shared) = weak.upgrade() else { return };
                        SupplierSync { shared }.set_search_active(active);
                        continue;
                    }
                }
                let Some(shared) = weak.upgrade() else { return };
                shared.recompute();
            }
        });
    }
}

impl std::fmt::Debug for SupplierSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupplierSync").field("polling", &self.is_polling()).finish()
    }
}
