//! Render session: owns one rendered tree and patches it as resources land.

use std::collections::{HashMap, HashSet};

use kurbo::Point;

use figview_core::node::{Node, NodeId};
use figview_core::resources::{
    FontKey, FontLoadState, FontStates, GenerationTag, Generations, ImageKey, ImageMap, ResourceError,
    ResourceEvent, ResourceEventReceiver,
};

use crate::paint::{PaintKind, PaintNode};
use crate::scene_graph::{
    RenderContext, RenderDiagnostic, RenderOptions, ResourceRequest, paint_fills, paint_text,
    render,
};

/// A painted node that depends on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Dependant {
    id: NodeId,
    source_path: Vec<usize>,
    paint_path: Vec<usize>,
}

#[derive(Debug, Default)]
struct DependencyIndex {
    images: HashMap<ImageKey, Vec<Dependant>>,
    fonts: HashMap<String, Vec<Dependant>>,
}

impl DependencyIndex {
    fn build(root: &Node, tree: &PaintNode) -> Self {
        let mut index = Self::default();
        index.visit(root, tree, &mut Vec::new(), &mut Vec::new());
        index
    }

    fn visit(
        &mut self,
        node: &Node,
        painted: &PaintNode,
        source_path: &mut Vec<usize>,
        paint_path: &mut Vec<usize>,
    ) {
        let dependant = || Dependant {
            id: node.id.clone(),
            source_path: source_path.clone(),
            paint_path: paint_path.clone(),
        };

        let mut seen = HashSet::new();
        for key in painted.fills.iter().filter_map(|fill| fill.image_key()) {
            if seen.insert(key) {
                self.images.entry(key.clone()).or_default().push(dependant());
            }
        }
        if let Some(family) = painted.text.as_ref().and_then(|t| t.requested_family.as_ref()) {
            self.fonts.entry(family.clone()).or_default().push(dependant());
        }

        if painted.is_error_marker() {
            return;
        }

        // Invisible children and masks have no paint node.
        let painted_children = node
            .children
            .iter()
            .enumerate()
            .filter(|(_, child)| child.visible && !child.is_mask);
        for (paint_index, (source_index, child)) in painted_children.enumerate() {
            let Some(painted_child) = painted.children.get(paint_index) else {
                break;
            };
            source_path.push(source_index);
            paint_path.push(paint_index);
            self.visit(child, painted_child, source_path, paint_path);
            source_path.pop();
            paint_path.pop();
        }
    }
}

fn source_at<'a>(node: &'a Node, path: &[usize]) -> Option<&'a Node> {
    match path.split_first() {
        None => Some(node),
        Some((index, rest)) => source_at(node.children.get(*index)?, rest),
    }
}

/// One live rendering of a document root.
pub struct RenderSession {
    root: Node,
    images: ImageMap,
    fonts: FontStates,
    options: RenderOptions,
    generations: Generations,
    generation: GenerationTag,
    tree: PaintNode,
    index: DependencyIndex,
    pending: Vec<ResourceRequest>,
    requested: HashSet<ResourceRequest>,
    failed_images: HashMap<ImageKey, ResourceError>,
    failed_fonts: HashMap<FontKey, String>,
    diagnostics: Vec<RenderDiagnostic>,
}

impl RenderSession {
    /// Run the first synchronous pass over `root`.
    pub fn new(root: Node, images: ImageMap, fonts: FontStates, options: RenderOptions) -> Self {
        let generations = Generations::new();
        let generation = generations.current();
        let mut session = Self {
            tree: PaintNode::new(root.id.clone(), PaintKind::Group),
            root,
            images,
            fonts,
            options,
            generations,
            generation,
            index: DependencyIndex::default(),
            pending: Vec::new(),
            requested: HashSet::new(),
            failed_images: HashMap::new(),
            failed_fonts: HashMap::new(),
            diagnostics: Vec::new(),
        };
        session.rerender();
        session
    }

    pub fn tree(&self) -> &PaintNode {
        &self.tree
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn images(&self) -> &ImageMap {
        &self.images
    }

    pub fn fonts(&self) -> &FontStates {
        &self.fonts
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn generation(&self) -> GenerationTag {
        self.generation
    }

    /// Shared generation counter, handed to resolvers.
    pub fn generations(&self) -> &Generations {
        &self.generations
    }

    pub fn diagnostics(&self) -> &[RenderDiagnostic] {
        &self.diagnostics
    }

    pub fn failed_image(&self, key: &ImageKey) -> Option<&ResourceError> {
        self.failed_images.get(key)
    }

    pub fn failed_font(&self, key: &FontKey) -> Option<&str> {
        self.failed_fonts.get(key).map(String::as_str)
    }

    /// Drain requests recorded since the last call. Each is returned once.
    pub fn take_requests(&mut self) -> Vec<ResourceRequest> {
        std::mem::take(&mut self.pending)
    }

    /// Supersede the current tree with `root` under a new generation.
    pub fn replace_root(&mut self, root: Node) -> GenerationTag {
        self.generation = self.generations.advance();
        log::debug!(
            "Replacing root '{}' with '{}' (generation {})",
            self.root.id,
            root.id,
            self.generation.0
        );
        self.root = root;
        self.pending.clear();
        self.requested.clear();
        self.failed_images.clear();
        self.failed_fonts.clear();
        self.rerender();
        self.generation
    }

    /// Full pass from the current shared state.
    pub fn rerender(&mut self) {
        let ctx = RenderContext::new(&self.images, &self.fonts, &self.options);
        let origin = self.root.bounds().map(|b| b.origin()).unwrap_or(Point::ZERO);
        match render(&self.root, origin, &ctx) {
            Some(tree) => self.tree = tree,
            None => {
                log::warn!("Root '{}' is invisible; nothing to paint", self.root.id);
                self.tree = PaintNode::new(self.root.id.clone(), PaintKind::Group);
            }
        }
        self.index = DependencyIndex::build(&self.root, &self.tree);
        self.diagnostics = ctx.take_diagnostics();
        let requests = ctx.take_requests();
        self.queue(requests);
    }

    /// Apply one resolver completion. Returns the ids of re-painted nodes.
    pub fn apply(&mut self, event: ResourceEvent) -> Vec<NodeId> {
        if event.generation() != self.generation {
            log::debug!(
                "Dropping event for generation {} (live {})",
                event.generation().0,
                self.generation.0
            );
            return Vec::new();
        }

        match event {
            ResourceEvent::ImageReady { key, .. } => {
                self.failed_images.remove(&key);
                let dependants = self.index.images.get(&key).cloned().unwrap_or_default();
                self.repaint(&dependants, |node, painted, ctx| {
                    let fills = paint_fills(node, ctx);
                    let changed = painted.fills != fills;
                    painted.fills = fills;
                    changed
                })
            }
            ResourceEvent::ImageFailed { error, .. } => {
                if let ResourceError::AssetFetchFailed { key, .. } = &error {
                    log::warn!("{}", error);
                    self.failed_images.insert(key.clone(), error.clone());
                }
                Vec::new()
            }
            ResourceEvent::FontState { key, state, .. } => match state {
                FontLoadState::Loaded => {
                    let dependants = self.index.fonts.get(&key.family).cloned().unwrap_or_default();
                    self.repaint(&dependants, |node, painted, ctx| {
                        let text = paint_text(node, ctx);
                        let changed = painted.text != text;
                        painted.text = text;
                        changed
                    })
                }
                FontLoadState::Error(reason) => {
                    log::warn!("Font '{}' stays on fallback: {}", key, reason);
                    self.failed_fonts.insert(key, reason);
                    Vec::new()
                }
                FontLoadState::NotRequested | FontLoadState::Loading => Vec::new(),
            },
        }
    }

    /// Apply every event currently queued on `events`.
    pub fn pump(&mut self, events: &mut ResourceEventReceiver) -> Vec<NodeId> {
        let mut touched = Vec::new();
        while let Ok(event) = events.try_recv() {
            for id in self.apply(event) {
                if !touched.contains(&id) {
                    touched.push(id);
                }
            }
        }
        touched
    }

    fn repaint<F>(&mut self, dependants: &[Dependant], mut patch: F) -> Vec<NodeId>
    where
        F: FnMut(&Node, &mut PaintNode, &RenderContext) -> bool,
    {
        if dependants.is_empty() {
            return Vec::new();
        }

        let ctx = RenderContext::new(&self.images, &self.fonts, &self.options);
        let mut touched = Vec::new();
        for dependant in dependants {
            let Some(node) = source_at(&self.root, &dependant.source_path) else {
                continue;
            };
            let Some(painted) = self.tree.at_path_mut(&dependant.paint_path) else {
                continue;
            };
            if patch(node, painted, &ctx) {
                touched.push(dependant.id.clone());
            }
        }
        let requests = ctx.take_requests();
        self.queue(requests);
        touched
    }

    fn queue(&mut self, requests: Vec<ResourceRequest>) {
        for request in requests {
            if self.requested.insert(request.clone()) {
                self.pending.push(request);
            }
        }
    }
}
