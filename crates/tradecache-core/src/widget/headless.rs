//! In-memory widget host.
//!
//! Models the container tree as named viewports plus a parking holder, each
//! holding an ordered list of embed ids. Counters record every script load,
//! construction and reparenting so callers can verify that handoffs never
//! rebuild the embed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::error::HostError;
use super::host::{EmbedConfig, EmbedHandle, Placement, WidgetHost};

pub type EmbedId = u64;

#[derive(Clone, Default)]
pub struct HeadlessHost {
    dom: Arc<Mutex<Dom>>,
}

#[derive(Default)]
struct Dom {
    viewports: BTreeMap<String, Vec<EmbedId>>,
    parking: Vec<EmbedId>,
    embeds: HashMap<EmbedId, EmbedNode>,
    next_id: EmbedId,
    script_loads: usize,
    constructions: usize,
    moves: usize,
    failing_bootstraps: usize,
}

struct EmbedNode {
    config: EmbedConfig,
    placement: Placement,
}

impl Dom {
    fn detach(&mut self, id: EmbedId, from: &Placement) {
        let list = match from {
            Placement::Parked => Some(&mut self.parking),
            Placement::Viewport(name) => self.viewports.get_mut(name),
        };
        if let Some(list) = list {
            list.retain(|child| *child != id);
        }
    }

    fn move_to(&mut self, id: EmbedId, to: Placement) -> Result<(), HostError> {
        if let Placement::Viewport(ref name) = to {
            if !self.viewports.contains_key(name) {
                return Err(HostError::ViewportMissing(name.clone()));
            }
        }
        let from = self
            .embeds
            .get(&id)
            .map(|node| node.placement.clone())
            .ok_or(HostError::Disposed)?;
        if from == to {
            return Ok(());
        }

        self.detach(id, &from);
        match to {
            Placement::Parked => self.parking.push(id),
            Placement::Viewport(ref name) => {
                if let Some(list) = self.viewports.get_mut(name) {
                    list.push(id);
                }
            }
        }
        if let Some(node) = self.embeds.get_mut(&id) {
            node.placement = to;
        }
        self.moves += 1;
        Ok(())
    }
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_viewports(names: &[&str]) -> Self {
        let host = Self::new();
        for name in names {
            host.add_viewport(name);
        }
        host
    }

    pub fn add_viewport(&self, name: &str) {
        self.dom().viewports.entry(name.to_string()).or_default();
    }

    /// Make the next `count` bootstrap loads fail.
    pub fn fail_bootstraps(&self, count: usize) {
        self.dom().failing_bootstraps = count;
    }

    /// Embeds currently parented to `viewport`.
    pub fn children(&self, viewport: &str) -> Vec<EmbedId> {
        self.dom().viewports.get(viewport).cloned().unwrap_or_default()
    }

    pub fn parked(&self) -> Vec<EmbedId> {
        self.dom().parking.clone()
    }

    pub fn live_embeds(&self) -> usize {
        self.dom().embeds.len()
    }

    pub fn embed_config(&self, id: EmbedId) -> Option<EmbedConfig> {
        self.dom().embeds.get(&id).map(|node| node.config.clone())
    }

    pub fn script_loads(&self) -> usize {
        self.dom().script_loads
    }

    pub fn constructions(&self) -> usize {
        self.dom().constructions
    }

    pub fn moves(&self) -> usize {
        self.dom().moves
    }

    fn dom(&self) -> MutexGuard<'_, Dom> {
        self.dom.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WidgetHost for HeadlessHost {
    async fn load_bootstrap(&self) -> Result<(), HostError> {
        // Script loads complete on a later turn of the event loop
        tokio::task::yield_now().await;
        let mut dom = self.dom();
        if dom.failing_bootstraps > 0 {
            dom.failing_bootstraps -= 1;
            return Err(HostError::ScriptLoad("network error".to_string()));
        }
        dom.script_loads += 1;
        Ok(())
    }

    async fn create(&self, config: &EmbedConfig) -> Result<Box<dyn EmbedHandle>, HostError> {
        tokio::task::yield_now().await;
        let mut dom = self.dom();
        dom.next_id += 1;
        let id = dom.next_id;
        dom.constructions += 1;
        dom.parking.push(id);
        dom.embeds.insert(
            id,
            EmbedNode {
                config: config.clone(),
                placement: Placement::Parked,
            },
        );
        debug!(embed = id, symbol = %config.display_symbol, "Constructed headless embed");
        Ok(Box::new(HeadlessEmbed {
            id,
            dom: Arc::clone(&self.dom),
        }))
    }
}

struct HeadlessEmbed {
    id: EmbedId,
    dom: Arc<Mutex<Dom>>,
}

impl HeadlessEmbed {
    fn dom(&self) -> MutexGuard<'_, Dom> {
        self.dom.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EmbedHandle for HeadlessEmbed {
    fn placement(&self) -> Placement {
        self.dom()
            .embeds
            .get(&self.id)
            .map(|node| node.placement.clone())
            .unwrap_or(Placement::Parked)
    }

    fn attach(&mut self, viewport: &str) -> Result<(), HostError> {
        self.dom().move_to(self.id, Placement::Viewport(viewport.to_string()))
    }

    fn park(&mut self) -> Result<(), HostError> {
        self.dom().move_to(self.id, Placement::Parked)
    }

    fn apply(&mut self, config: &EmbedConfig) -> Result<(), HostError> {
        let mut dom = self.dom();
        let node = dom.embeds.get_mut(&self.id).ok_or(HostError::Disposed)?;
        node.config = config.clone();
        Ok(())
    }

    fn dispose(self: Box<Self>) {
        let mut dom = self.dom();
        if let Some(node) = dom.embeds.remove(&self.id) {
            dom.detach(self.id, &node.placement);
        }
    }
}
