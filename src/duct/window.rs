//! Window brackets between gates, reducers and plain ducts.

use super::{Duct, DuctId, Incoming, Link, Reducing, StreamGraph};
use crate::error::{FlowError, Result};
use crate::tuple::TupleLike;

/// Flattens the groupings of a gate into their joined rows.
pub struct OpenWindow {
    name: String,
    next: Link,
}

impl OpenWindow {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            next: Link::new(&name),
            name,
        }
    }
}

impl Duct for OpenWindow {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        self.next.bind(id, graph)
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        self.next.start()
    }

    fn receive(&self, _from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        match incoming {
            Incoming::Grouping(grouping) => {
                for row in grouping.iter() {
                    self.next.receive_tuple(&row)?;
                }
                Ok(())
            }
            Incoming::Tuple(_) => self.next.receive(incoming),
        }
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        self.next.complete()
    }
}

/// Brackets every grouping with `start_group`/`complete_group` for a reducer.
///
/// Rows are pushed one by one, unless the reducer consumes whole groupings.
pub struct OpenReducingWindow {
    name: String,
    next: Link,
}

impl OpenReducingWindow {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            next: Link::new(&name),
            name,
        }
    }
}

impl Duct for OpenReducingWindow {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        self.next.bind(id, graph)?;
        if self.next.reducing().is_none() {
            return Err(FlowError::Topology(format!(
                "'{}' must feed a reducing duct",
                self.name
            )));
        }
        Ok(())
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        self.next.start()
    }

    fn receive(&self, _from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        let Incoming::Grouping(grouping) = incoming else {
            return Err(FlowError::protocol(&self.name, "expected a grouping"));
        };
        let Some((from, reducing)) = self.next.reducing() else {
            return Err(FlowError::protocol(&self.name, "successor is not reducing"));
        };
        let key = grouping.key();
        reducing.start_group(from, key)?;
        if self.next.duct().is_some_and(|d| d.accepts_grouping()) {
            self.next.receive(incoming)?;
        } else {
            for row in grouping.iter() {
                self.next.receive_tuple(&row)?;
            }
        }
        reducing.complete_group(from, key)
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        self.next.complete()
    }
}

/// Turns group results back into plain tuples behind a reducing fork.
///
/// Group rows are swallowed; each `complete_group` result is pushed as a tuple.
pub struct CloseWindow {
    name: String,
    next: Link,
}

impl CloseWindow {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            next: Link::new(&name),
            name,
        }
    }
}

impl Duct for CloseWindow {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        self.next.bind(id, graph)
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        self.next.start()
    }

    fn receive(&self, _from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        match incoming {
            Incoming::Tuple(_) => Ok(()),
            Incoming::Grouping(_) => Err(FlowError::protocol(&self.name, "unexpected grouping")),
        }
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        self.next.complete()
    }

    fn as_reducing(&self) -> Option<&dyn Reducing> {
        Some(self)
    }
}

impl Reducing for CloseWindow {
    fn start_group(&self, _from: DuctId, _key: &dyn TupleLike) -> Result<()> {
        Ok(())
    }

    fn complete_group(&self, _from: DuctId, result: &dyn TupleLike) -> Result<()> {
        self.next.receive_tuple(result)
    }
}
