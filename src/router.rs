use std::{borrow::Cow, collections::HashMap, sync::Arc};

use crate::{error::BuildError, procedure::Procedure};

enum Entry {
    Procedure(Procedure),
    Nested(RouterBuilder),
}

/// The nested namespace procedures are declared in.
///
/// Built once at startup and flattened by [`RouterBuilder::build`]; any two
/// branches colliding on the same dot-joined path abort the build, so a
/// misassembled router can never serve a single call.
#[derive(Default)]
pub struct RouterBuilder {
    entries: Vec<(Cow<'static, str>, Entry)>,
    expose_errors: bool,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `procedure` under `name` within this node.
    pub fn procedure(mut self, name: impl Into<Cow<'static, str>>, procedure: Procedure) -> Self {
        self.entries.push((name.into(), Entry::Procedure(procedure)));
        self
    }

    /// Mounts `router` as a child namespace under `name`.
    pub fn nest(mut self, name: impl Into<Cow<'static, str>>, router: RouterBuilder) -> Self {
        self.entries.push((name.into(), Entry::Nested(router)));
        self
    }

    /// When enabled, error responses carry the formatted cause chain in
    /// `data.stack`. Leave this off outside local development: it exposes
    /// implementation detail to callers.
    pub fn expose_errors(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }

    /// Flattens the tree into the path map the dispatcher consults.
    pub fn build(self) -> Result<Router, BuildError> {
        let mut procedures = HashMap::new();
        flatten("", self.entries, &mut procedures)?;
        Ok(Router {
            procedures,
            expose_errors: self.expose_errors,
        })
    }
}

fn flatten(
    prefix: &str,
    entries: Vec<(Cow<'static, str>, Entry)>,
    out: &mut HashMap<Cow<'static, str>, Procedure>,
) -> Result<(), BuildError> {
    for (name, entry) in entries {
        if name.is_empty() || name.contains('.') {
            return Err(BuildError::InvalidSegment {
                segment: name.into_owned(),
            });
        }

        let path = if prefix.is_empty() {
            name.into_owned()
        } else {
            format!("{prefix}.{name}")
        };

        match entry {
            Entry::Procedure(procedure) => {
                if out.insert(Cow::Owned(path.clone()), procedure).is_some() {
                    return Err(BuildError::DuplicatePath { path });
                }
            }
            Entry::Nested(router) => flatten(&path, router.entries, out)?,
        }
    }

    Ok(())
}

/// The flattened, read-only path → procedure map.
///
/// Owns every [`Procedure`] for the process lifetime. Contains no interior
/// mutability, so an `Arc<Router>` can be consulted from any number of
/// concurrent calls without locking.
#[derive(Debug)]
pub struct Router {
    procedures: HashMap<Cow<'static, str>, Procedure>,
    expose_errors: bool,
}

impl Router {
    pub fn get(&self, path: &str) -> Option<&Procedure> {
        self.procedures.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(|k| k.as_ref())
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    pub(crate) fn expose_errors(&self) -> bool {
        self.expose_errors
    }

    pub fn arced(self) -> Arc<Self> {
        Arc::new(self)
    }
}
