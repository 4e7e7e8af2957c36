use std::collections::HashMap;
use std::fmt::{Display, Formatter, Write};

use console::{Style, style};
use petgraph::Graph;
use petgraph::dot::Dot;
use petgraph::graph::NodeIndex;
use serde::Serialize;

use crate::core::{ResourceId, TaskId};
use crate::graph::{TaskGraph, TaskRunner};
use crate::tracker::{TaskStatus, WaitingOn};

/// A single tracked task, as seen by [`TaskGraph::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub waiting_on: WaitingOn,
    pub required_before: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// A single tracked resource, as seen by [`TaskGraph::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub name: String,
    pub type_name: &'static str,
    pub release_on: Option<String>,
}

/// Why one task is connected to another in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Edge {
    /// The target lists the source as a before-task.
    Before,
    /// The target reads a resource the source declares as output.
    Resource(String),
}

impl Display for Edge {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Before => f.write_str("before"),
            Edge::Resource(name) => f.write_str(name),
        }
    }
}

/// Read-only view of every tracked task and resource, ordered by id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub tasks: Vec<TaskSnapshot>,
    pub resources: Vec<ResourceSnapshot>,
}

impl<R> TaskGraph<R>
where
    R: TaskRunner,
{
    /// Captures the current state of the trackers.
    pub fn snapshot(&self) -> Snapshot {
        let tasks = self
            .tasks
            .iter()
            .map(|task| TaskSnapshot {
                id: task.id(),
                name: task.name().to_string(),
                status: task.status(),
                waiting_on: task.waiting_on().clone(),
                required_before: task.required_before().iter().map(|s| s.to_string()).collect(),
                inputs: task.declaration().inputs().iter().map(|s| s.to_string()).collect(),
                outputs: task.declaration().outputs().iter().map(|s| s.to_string()).collect(),
            })
            .collect();

        let resources = self
            .resources
            .iter()
            .map(|resource| ResourceSnapshot {
                id: resource.id(),
                name: resource.name().to_string(),
                type_name: resource.type_name(),
                release_on: resource.release_on().map(ToString::to_string),
            })
            .collect();

        Snapshot { tasks, resources }
    }

    /// See [`Snapshot::dependency_graph`].
    pub fn dependency_graph(&self) -> Graph<String, Edge> {
        self.snapshot().dependency_graph()
    }

    /// See [`Snapshot::render_dot`].
    pub fn render_dot(&self) -> String {
        self.snapshot().render_dot()
    }
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Builds a petgraph graph with one node per tracked task.
    ///
    /// Node `i` is `tasks[i]`, labelled `name #id`. Edges point from a
    /// before-task or producer to the task that waits for it.
    pub fn dependency_graph(&self) -> Graph<String, Edge> {
        let mut graph = Graph::with_capacity(self.tasks.len(), self.tasks.len());

        let mut by_name: HashMap<&str, Vec<NodeIndex>> = HashMap::new();
        let mut producers: HashMap<&str, Vec<NodeIndex>> = HashMap::new();

        for task in &self.tasks {
            let index = graph.add_node(format!("{} {}", task.name, task.id));
            by_name.entry(task.name.as_str()).or_default().push(index);
            for output in &task.outputs {
                producers.entry(output.as_str()).or_default().push(index);
            }
        }

        for (i, task) in self.tasks.iter().enumerate() {
            let target = NodeIndex::new(i);

            for before in &task.required_before {
                for source in by_name.get(before.as_str()).into_iter().flatten() {
                    graph.add_edge(*source, target, Edge::Before);
                }
            }

            for input in &task.inputs {
                for source in producers.get(input.as_str()).into_iter().flatten() {
                    if *source != target {
                        graph.add_edge(*source, target, Edge::Resource(input.clone()));
                    }
                }
            }
        }

        graph
    }

    /// Renders the dependency graph in Graphviz DOT.
    pub fn render_dot(&self) -> String {
        let graph = self.dependency_graph();
        format!("{}", Dot::new(&graph))
    }

    /// Renders the dependency graph as a Mermaid diagram, color-coded by
    /// task status.
    pub fn render_mermaid(&self) -> String {
        let graph = self.dependency_graph();
        let mut f = String::new();

        // Writing into a String can't fail.
        let _ = writeln!(f, "graph LR");

        for (index, task) in graph.node_indices().zip(&self.tasks) {
            let name = task.name.replace('"', "\\\"");
            let mut label = task.status.to_string();

            if !task.waiting_on.is_empty() {
                let waiting: Vec<&str> = task
                    .waiting_on
                    .tasks
                    .iter()
                    .chain(&task.waiting_on.inputs)
                    .map(String::as_str)
                    .collect();
                let _ = write!(label, "\\nwaiting: {}", waiting.join(", ").replace('"', "\\\""));
            }

            let _ = writeln!(f, "    {:?}[\"{}\\n{}\"]", index.index(), name, label);
            let _ = writeln!(f, "    style {:?} fill:{}", index.index(), status_color(task.status));
        }

        for edge in graph.edge_indices() {
            let Some((source, target)) = graph.edge_endpoints(edge) else {
                continue;
            };

            match &graph[edge] {
                Edge::Before => {
                    let _ = writeln!(f, "    {:?} --> {:?}", source.index(), target.index());
                }
                Edge::Resource(name) => {
                    let name = name.replace('<', "&lt;").replace('>', "&gt;");
                    let _ = writeln!(
                        f,
                        "    {:?} -- \"{}\" --> {:?}",
                        source.index(),
                        name,
                        target.index()
                    );
                }
            }
        }

        f
    }
}

fn status_color(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Initialized => "#D3D3D3",
        TaskStatus::Blocked => "#FFB347",
        TaskStatus::ReadyForAssignment => "#FFFF99",
        TaskStatus::Running => "#ADD8E6",
        TaskStatus::Complete => "#90EE90",
        TaskStatus::RuntimeError => "#FF6961",
        TaskStatus::Skipped => "#C0C0C0",
    }
}

fn status_style(status: TaskStatus) -> Style {
    match status {
        TaskStatus::Initialized => Style::new().dim(),
        TaskStatus::Blocked => Style::new().yellow(),
        TaskStatus::ReadyForAssignment => Style::new().cyan(),
        TaskStatus::Running => Style::new().blue(),
        TaskStatus::Complete => Style::new().green(),
        TaskStatus::RuntimeError => Style::new().red().bold(),
        TaskStatus::Skipped => Style::new().dim(),
    }
}

impl Display for Snapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self
            .tasks
            .iter()
            .map(|task| task.name.len())
            .chain(self.resources.iter().map(|resource| resource.name.len()))
            .max()
            .unwrap_or(0);

        writeln!(f, "{}", style("Tasks").bold())?;
        for task in &self.tasks {
            write!(
                f,
                "  {:>6}  {:<width$}  {:<20}",
                task.id.to_string(),
                task.name,
                status_style(task.status).apply_to(task.status.as_str()),
            )?;

            if !task.waiting_on.tasks.is_empty() {
                write!(f, "  tasks: {}", task.waiting_on.tasks.join(", "))?;
            }
            if !task.waiting_on.inputs.is_empty() {
                write!(f, "  inputs: {}", task.waiting_on.inputs.join(", "))?;
            }
            writeln!(f)?;
        }

        writeln!(f, "{}", style("Resources").bold())?;
        for resource in &self.resources {
            writeln!(
                f,
                "  {:>6}  {:<width$}  {}{}",
                resource.id.to_string(),
                resource.name,
                style(resource.type_name).dim(),
                match &resource.release_on {
                    Some(phase) => format!(" (until {phase})"),
                    None => String::new(),
                },
            )?;
        }

        Ok(())
    }
}
