use glam::{Mat4, Vec3};
use serde::Serialize;
use strum_macros::{AsRefStr, EnumString};
use tracing::warn;

/// Matrix taking SimSpark coordinates (z up, x toward the right goal) into
/// the viewer's y-up frame.
pub const COORD_TFN: Mat4 = Mat4::from_cols_array(&[
    -1.0, 0.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
]);

/// Node types the server declares with `(nd <type> ...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, EnumString)]
pub enum NodeKind {
    #[strum(serialize = "TRF")]
    Transform,
    #[strum(serialize = "StaticMesh")]
    StaticMesh,
    #[strum(serialize = "SMN")]
    StandardMesh,
    #[strum(serialize = "Light")]
    Light,
    /// Any other declared type. Kept so diff positions stay aligned.
    #[strum(disabled)]
    Other,
}

impl NodeKind {
    pub fn is_mesh(self) -> bool {
        matches!(self, NodeKind::StaticMesh | NodeKind::StandardMesh)
    }
}

/// One operation carried inside a node expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeOp {
    /// `(SLT m0 .. m15)`, column-major.
    SetLocalTransform(Mat4),
    /// `(load model args..)`
    Load(String),
    /// `(sSc x y z)`
    Scale(Vec3),
    /// `(setVisible 0|1)`
    Visible(bool),
    /// `(setTransparent)`
    Transparent,
    /// `(resetMaterials m..)`
    Materials(Vec<String>),
}

/// A node expression as decoded from the wire, before it is applied to a graph.
///
/// In a full graph every node carries its `kind`. Diff nodes never do and are
/// matched to existing nodes by position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeUpdate {
    pub kind: Option<NodeKind>,
    pub ops: Vec<NodeOp>,
    pub children: Vec<NodeUpdate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mesh {
    pub model: String,
    pub scale: Vec3,
    pub visible: bool,
    pub transparent: bool,
    pub materials: Vec<String>,
}

impl Default for Mesh {
    fn default() -> Self {
        Self {
            model: String::new(),
            scale: Vec3::ONE,
            visible: false,
            transparent: false,
            materials: Vec::new(),
        }
    }
}

impl Mesh {
    pub fn has_material(&self, name: &str) -> bool {
        self.materials.iter().any(|m| m == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    /// `None` only for the implicit root.
    pub kind: Option<NodeKind>,
    pub local: Mat4,
    pub mesh: Option<Mesh>,
    pub children: Vec<Node>,
}

/// Index path from the root to a node. Stable for the lifetime of a graph,
/// since diffs never change the structure.
pub type NodePath = Vec<usize>;

impl Node {
    fn root() -> Self {
        Node {
            kind: None,
            local: Mat4::IDENTITY,
            mesh: None,
            children: Vec::new(),
        }
    }

    fn declare(update: &NodeUpdate, kind: NodeKind) -> Self {
        let mut node = Node {
            kind: Some(kind),
            local: Mat4::IDENTITY,
            mesh: kind.is_mesh().then(Mesh::default),
            children: Vec::with_capacity(update.children.len()),
        };
        node.apply_ops(&update.ops);
        for child in &update.children {
            match child.kind {
                Some(kind) => node.children.push(Node::declare(child, kind)),
                None => warn!("skipping undeclared node in full scene graph"),
            }
        }
        node
    }

    fn apply_ops(&mut self, ops: &[NodeOp]) {
        for op in ops {
            match (op, self.mesh.as_mut()) {
                (NodeOp::SetLocalTransform(m), _) => {
                    if self.kind == Some(NodeKind::Transform) {
                        self.local = *m;
                    }
                }
                (NodeOp::Load(model), Some(mesh)) => mesh.model = model.clone(),
                (NodeOp::Scale(s), Some(mesh)) => {
                    mesh.scale = *s;
                    // Mesh nodes are positioned only through their scale.
                    self.local = Mat4::from_scale(*s);
                }
                (NodeOp::Visible(v), Some(mesh)) => mesh.visible = *v,
                (NodeOp::Transparent, Some(mesh)) => mesh.transparent = true,
                (NodeOp::Materials(mats), Some(mesh)) => mesh.materials = mats.clone(),
                (_, None) => {}
            }
        }
    }

    /// Applies a diff positionally. Returns how many diff nodes had no counterpart.
    fn apply_diff(&mut self, diff: &NodeUpdate) -> usize {
        self.apply_ops(&diff.ops);
        let mut unmatched = diff.children.len().saturating_sub(self.children.len());
        for (child, child_diff) in self.children.iter_mut().zip(&diff.children) {
            unmatched += child.apply_diff(child_diff);
        }
        unmatched
    }
}

/// The drawable hierarchy described by the monitor stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneGraph {
    root: Node,
}

impl SceneGraph {
    /// Builds a graph from the node declarations of a full (`RSG`) message.
    pub fn build(nodes: &[NodeUpdate]) -> Self {
        let mut root = Node::root();
        for update in nodes {
            match update.kind {
                Some(kind) => root.children.push(Node::declare(update, kind)),
                None => warn!("skipping undeclared node in full scene graph"),
            }
        }
        SceneGraph { root }
    }

    /// Applies the node updates of a diff (`RDS`) message in place.
    pub fn apply_diff(&mut self, nodes: &[NodeUpdate]) {
        let unmatched = self.root.apply_diff(&NodeUpdate {
            kind: None,
            ops: Vec::new(),
            children: nodes.to_vec(),
        });
        if unmatched > 0 {
            warn!("scene graph diff addressed {unmatched} nodes that do not exist");
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn node(&self, path: &[usize]) -> Option<&Node> {
        let mut node = &self.root;
        for &idx in path {
            node = node.children.get(idx)?;
        }
        Some(node)
    }

    /// Accumulated transform of the node at `path`, in server coordinates.
    pub fn world_transform(&self, path: &[usize]) -> Option<Mat4> {
        let mut node = &self.root;
        let mut transform = node.local;
        for &idx in path {
            node = node.children.get(idx)?;
            transform *= node.local;
        }
        Some(transform)
    }

    /// All mesh nodes below `path` in depth-first order with their world transforms.
    pub fn meshes_under(&self, path: &[usize]) -> Vec<MeshInstance<'_>> {
        let mut out = Vec::new();
        if let (Some(node), Some(transform)) = (self.node(path), self.world_transform(path)) {
            let mut path = path.to_vec();
            collect_meshes(node, transform, &mut path, &mut out);
        }
        out
    }

    pub fn meshes(&self) -> Vec<MeshInstance<'_>> {
        self.meshes_under(&[])
    }

    /// Path of the first mesh whose model name ends with `suffix`.
    pub fn find_mesh_by_model(&self, suffix: &str) -> Option<NodePath> {
        self.meshes()
            .into_iter()
            .find(|m| m.mesh.model.ends_with(suffix))
            .map(|m| m.path)
    }

    /// Path of the first mesh carrying every material in `materials`.
    pub fn find_mesh_by_materials(&self, materials: &[&str]) -> Option<NodePath> {
        self.meshes()
            .into_iter()
            .find(|m| materials.iter().all(|name| m.mesh.has_material(name)))
            .map(|m| m.path)
    }
}

/// A mesh node together with where it sits in the graph.
#[derive(Debug, Clone)]
pub struct MeshInstance<'a> {
    pub path: NodePath,
    pub mesh: &'a Mesh,
    pub world: Mat4,
}

impl MeshInstance<'_> {
    /// Model matrix in viewer coordinates.
    pub fn model_matrix(&self) -> Mat4 {
        COORD_TFN * self.world
    }
}

fn collect_meshes<'a>(
    node: &'a Node,
    transform: Mat4,
    path: &mut NodePath,
    out: &mut Vec<MeshInstance<'a>>,
) {
    if let Some(mesh) = &node.mesh {
        out.push(MeshInstance {
            path: path.clone(),
            mesh,
            world: transform,
        });
    }
    for (idx, child) in node.children.iter().enumerate() {
        path.push(idx);
        collect_meshes(child, transform * child.local, path, out);
        path.pop();
    }
}
