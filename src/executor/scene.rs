//! In-memory scene graph executor.
//!
//! Stands in for the creative application when running the command server
//! locally (`command-bridge serve`) and in tests. Nodes live in a flat map
//! keyed by absolute path; `/obj`, `/mat` and `/out` exist from the start.
//! `save_hip` and `load_hip` persist the node map as JSON so a session can
//! be reloaded; `render_scene` only records the request.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{CommandExecutor, CommandRegistry, ExecutorError};

const ROOT_CONTEXTS: [&str; 3] = ["/obj", "/mat", "/out"];

const UNTITLED: &str = "untitled.hip";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    name: String,
    node_type: String,
    parameters: Map<String, Value>,
    material: Option<String>,
}

#[derive(Debug, Default)]
struct Scene {
    file: Option<PathBuf>,
    nodes: BTreeMap<String, Node>,
    counters: BTreeMap<String, u32>,
    renders: u32,
}

impl Scene {
    fn with_root_contexts() -> Self {
        let mut scene = Self::default();
        for path in ROOT_CONTEXTS {
            let name = path.trim_start_matches('/').to_owned();
            scene.nodes.insert(
                path.to_owned(),
                Node {
                    name: name.clone(),
                    node_type: format!("{name}net"),
                    parameters: Map::new(),
                    material: None,
                },
            );
        }
        scene
    }

    fn children<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = (&'a String, &'a Node)> + 'a {
        self.nodes
            .iter()
            .filter(move |(path, _)| parent_of(path) == Some(parent))
    }

    fn unique_name(&mut self, parent: &str, base: &str) -> String {
        loop {
            let counter = self.counters.entry(base.to_owned()).or_insert(0);
            *counter += 1;
            let candidate = format!("{base}{counter}");
            if !self.nodes.contains_key(&join(parent, &candidate)) {
                return candidate;
            }
        }
    }

    fn create(
        &mut self,
        parent: &str,
        node_type: &str,
        name: Option<String>,
        parameters: Map<String, Value>,
    ) -> Result<String, ExecutorError> {
        if !self.nodes.contains_key(parent) {
            return Err(ExecutorError::new(format!("Parent path not found: {parent}")));
        }

        let name = match name {
            Some(name) if name.is_empty() || name.contains('/') => {
                return Err(ExecutorError::new(format!("Invalid node name: {name:?}")));
            }
            Some(name) => name,
            None => self.unique_name(parent, node_type),
        };

        let path = join(parent, &name);
        if self.nodes.contains_key(&path) {
            return Err(ExecutorError::new(format!("Node already exists: {path}")));
        }

        self.nodes.insert(
            path.clone(),
            Node {
                name,
                node_type: node_type.to_owned(),
                parameters,
                material: None,
            },
        );
        Ok(path)
    }

    fn node(&self, path: &str) -> Result<&Node, ExecutorError> {
        self.nodes
            .get(path)
            .ok_or_else(|| ExecutorError::new(format!("Node not found: {path}")))
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node, ExecutorError> {
        self.nodes
            .get_mut(path)
            .ok_or_else(|| ExecutorError::new(format!("Node not found: {path}")))
    }

    fn describe(&self, path: &str) -> Result<Value, ExecutorError> {
        let node = self.node(path)?;
        let children: Vec<&String> = self.children(path).map(|(child, _)| child).collect();
        Ok(json!({
            "name": node.name,
            "path": path,
            "type": node.node_type,
            "parameters": node.parameters,
            "material": node.material,
            "children": children,
        }))
    }

    fn file_name(&self) -> String {
        self.file
            .as_ref()
            .and_then(|path| path.file_name())
            .map_or_else(|| UNTITLED.to_owned(), |name| name.to_string_lossy().into_owned())
    }

    fn save(&mut self, target: Option<PathBuf>) -> Result<PathBuf, ExecutorError> {
        let path = target
            .or_else(|| self.file.clone())
            .ok_or_else(|| ExecutorError::new("Scene has never been saved; file_path is required"))?;
        let bytes = serde_json::to_vec_pretty(&self.nodes)
            .map_err(|err| ExecutorError::new(format!("Failed to encode scene: {err}")))?;
        std::fs::write(&path, bytes)
            .map_err(|err| ExecutorError::new(format!("Failed to save {}: {err}", path.display())))?;
        self.file = Some(path.clone());
        Ok(path)
    }

    fn load(&mut self, path: PathBuf) -> Result<(), ExecutorError> {
        let bytes = std::fs::read(&path)
            .map_err(|err| ExecutorError::new(format!("Failed to load {}: {err}", path.display())))?;
        let nodes: BTreeMap<String, Node> = serde_json::from_slice(&bytes)
            .map_err(|err| ExecutorError::new(format!("Not a scene file {}: {err}", path.display())))?;
        let mut scene = Self::with_root_contexts();
        scene.nodes.extend(nodes);
        scene.file = Some(path);
        *self = scene;
        Ok(())
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(index) => Some(&path[..index]),
    }
}

fn join(parent: &str, name: &str) -> String {
    format!("{}/{name}", parent.trim_end_matches('/'))
}

fn default_obj() -> String {
    "/obj".into()
}

fn default_geo_type() -> String {
    "box".into()
}

fn default_material_type() -> String {
    "principledshader".into()
}

fn default_renderer() -> String {
    "karma".into()
}

#[derive(Debug, Deserialize)]
struct NoParams {}

#[derive(Debug, Deserialize)]
struct SaveHip {
    file_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct LoadHip {
    file_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RenderScene {
    output_path: Option<String>,
    #[serde(default = "default_renderer")]
    renderer: String,
    camera_path: Option<String>,
    resolution: Option<[u32; 2]>,
}

#[derive(Debug, Deserialize)]
struct CreateNode {
    node_type: String,
    #[serde(default = "default_obj")]
    parent_path: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateGeometry {
    #[serde(default = "default_geo_type")]
    geo_type: String,
    #[serde(default = "default_obj")]
    parent_path: String,
    name: Option<String>,
    position: Option<[f64; 3]>,
    #[serde(default)]
    parameters: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct NodePath {
    path: String,
}

#[derive(Debug, Deserialize)]
struct SetParameter {
    node_path: String,
    parameter_name: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct SetMaterial {
    node_path: String,
    #[serde(default = "default_material_type")]
    material_type: String,
    material_name: Option<String>,
    #[serde(default)]
    parameters: Map<String, Value>,
}

/// Executor backed by an in-memory scene.
pub struct SceneExecutor {
    registry: CommandRegistry,
}

impl SceneExecutor {
    /// Fresh scene containing only the root contexts, refusing privileged
    /// commands.
    #[must_use]
    pub fn new() -> Self {
        Self::with_privileged(false)
    }

    /// Fresh scene; `allow_privileged` unlocks `reset_scene`.
    #[must_use]
    pub fn with_privileged(allow_privileged: bool) -> Self {
        let scene = Arc::new(Mutex::new(Scene::with_root_contexts()));
        let mut registry = CommandRegistry::new().allow_privileged(allow_privileged);

        let state = Arc::clone(&scene);
        registry.register("get_scene_info", move |_: NoParams| {
            let scene = lock(&state);
            let top_level: Vec<Value> = ROOT_CONTEXTS
                .iter()
                .filter_map(|root| scene.nodes.get(*root).map(|node| (*root, node)))
                .map(|(path, node)| {
                    json!({
                        "name": node.name,
                        "type": node.node_type,
                        "path": path,
                        "child_count": scene.children(path).count(),
                    })
                })
                .collect();
            Ok(json!({
                "name": scene.file_name(),
                "node_count": scene.nodes.len(),
                "top_level_nodes": top_level,
            }))
        });

        let state = Arc::clone(&scene);
        registry.register("create_node", move |params: CreateNode| {
            let mut scene = lock(&state);
            let path = scene.create(&params.parent_path, &params.node_type, params.name, Map::new())?;
            scene.describe(&path)
        });

        let state = Arc::clone(&scene);
        registry.register("create_geometry", move |params: CreateGeometry| {
            let mut scene = lock(&state);
            let mut parameters = params.parameters;
            if let Some(position) = params.position {
                parameters.insert("t".into(), json!(position));
            }
            let path = scene.create(&params.parent_path, &params.geo_type, params.name, parameters)?;
            scene.describe(&path)
        });

        let state = Arc::clone(&scene);
        registry.register("get_node_info", move |params: NodePath| {
            lock(&state).describe(&params.path)
        });

        let state = Arc::clone(&scene);
        registry.register("delete_node", move |params: NodePath| {
            let mut scene = lock(&state);
            if ROOT_CONTEXTS.contains(&params.path.as_str()) {
                return Err(ExecutorError::new(format!(
                    "Cannot delete root context: {}",
                    params.path
                )));
            }
            scene.node(&params.path)?;
            let prefix = format!("{}/", params.path);
            scene
                .nodes
                .retain(|path, _| path != &params.path && !path.starts_with(&prefix));
            Ok(json!({ "deleted": params.path }))
        });

        let state = Arc::clone(&scene);
        registry.register("set_parameter", move |params: SetParameter| {
            let mut scene = lock(&state);
            let node = scene.node_mut(&params.node_path)?;
            node.parameters
                .insert(params.parameter_name.clone(), params.value.clone());
            Ok(json!({
                "node_path": params.node_path,
                "parameter_name": params.parameter_name,
                "value": params.value,
            }))
        });

        let state = Arc::clone(&scene);
        registry.register("set_material", move |params: SetMaterial| {
            let mut scene = lock(&state);
            scene.node(&params.node_path)?;
            let material_path = scene.create(
                "/mat",
                &params.material_type,
                params.material_name,
                params.parameters,
            )?;
            scene.node_mut(&params.node_path)?.material = Some(material_path.clone());
            Ok(json!({
                "node_path": params.node_path,
                "material_path": material_path,
                "material_type": params.material_type,
            }))
        });

        let state = Arc::clone(&scene);
        registry.register("save_hip", move |params: SaveHip| {
            let path = lock(&state).save(params.file_path)?;
            Ok(json!({ "file_path": path.display().to_string() }))
        });

        let state = Arc::clone(&scene);
        registry.register("load_hip", move |params: LoadHip| {
            let mut scene = lock(&state);
            scene.load(params.file_path)?;
            Ok(json!({
                "name": scene.file_name(),
                "node_count": scene.nodes.len(),
            }))
        });

        let state = Arc::clone(&scene);
        registry.register("render_scene", move |params: RenderScene| {
            let mut scene = lock(&state);
            if let Some(camera) = params.camera_path.as_deref() {
                scene.node(camera)?;
            }
            scene.renders += 1;
            let output_path = params
                .output_path
                .unwrap_or_else(|| format!("render{}.exr", scene.renders));
            let [width, height] = params.resolution.unwrap_or([1920, 1080]);
            Ok(json!({
                "output_path": output_path,
                "renderer": params.renderer,
                "camera_path": params.camera_path,
                "resolution": [width, height],
            }))
        });

        let state = Arc::clone(&scene);
        registry.register_privileged("reset_scene", move |_: NoParams| {
            let mut scene = lock(&state);
            let removed = scene.nodes.len().saturating_sub(ROOT_CONTEXTS.len());
            *scene = Scene::with_root_contexts();
            Ok(json!({ "removed": removed }))
        });

        Self { registry }
    }
}

impl Default for SceneExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for SceneExecutor {
    fn execute(&self, name: &str, params: Map<String, Value>) -> Result<Value, ExecutorError> {
        self.registry.execute(name, params)
    }
}

/// Lock the scene, taking it over as-is if a handler panicked while
/// holding it.
fn lock(scene: &Mutex<Scene>) -> MutexGuard<'_, Scene> {
    scene.lock().unwrap_or_else(PoisonError::into_inner)
}
