use crate::{
    core::{ComponentId, storage::SparseIndex},
    world::archetype::{ArchetypeId, Archetypes},
};
use fixedbitset::FixedBitSet;

/// How a system accesses a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InOut {
    In,
    Out,
    #[default]
    InOut,
    None,
}

/// Where a column's data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Source {
    /// Any table the entity lives in.
    #[default]
    Any,
    /// Only components owned by the entity itself.
    Owned,
    /// No data. Used to declare components a system will add.
    Empty,
    /// Data owned by the system rather than by matched entities.
    Parent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Oper {
    #[default]
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Term {
    pub id: ComponentId,
    pub inout: InOut,
    pub source: Source,
    pub oper: Oper,
}

impl Term {
    pub fn new(id: ComponentId) -> Self {
        Self {
            id,
            inout: InOut::default(),
            source: Source::default(),
            oper: Oper::default(),
        }
    }

    pub fn read(id: ComponentId) -> Self {
        Self::new(id).inout(InOut::In)
    }

    pub fn write(id: ComponentId) -> Self {
        Self::new(id).inout(InOut::Out)
    }

    pub fn inout(mut self, inout: InOut) -> Self {
        self.inout = inout;
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn oper(mut self, oper: Oper) -> Self {
        self.oper = oper;
        self
    }

    pub fn empty(self) -> Self {
        self.source(Source::Empty)
    }

    pub fn owned(self) -> Self {
        self.source(Source::Owned)
    }

    pub fn not(self) -> Self {
        self.oper(Oper::Not)
    }

    pub fn or(self) -> Self {
        self.oper(Oper::Or)
    }

    /// Whether this term is resolved against the tables a query matches.
    pub fn is_table_term(&self) -> bool {
        matches!(self.source, Source::Any | Source::Owned)
    }
}

/// Ordered list of terms a system declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    terms: Vec<Term>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn read(self, id: ComponentId) -> Self {
        self.with(Term::read(id))
    }

    pub fn write(self, id: ComponentId) -> Self {
        self.with(Term::write(id))
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// True if at least one term has to be matched against tables.
    pub fn needs_tables(&self) -> bool {
        self.terms.iter().any(Term::is_table_term)
    }

    /// True if the system writes anything at all.
    pub fn has_out(&self) -> bool {
        self.terms.iter().any(|term| term.inout != InOut::In)
    }

    /// Components read with `In` access.
    pub fn inputs(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.terms
            .iter()
            .filter(|term| term.inout == InOut::In)
            .map(|term| term.id)
    }

    pub fn matches(&self, components: &FixedBitSet) -> bool {
        let has = |id: ComponentId| components.contains(id.to_usize());

        let mut index = 0;
        while index < self.terms.len() {
            let term = &self.terms[index];

            if term.oper == Oper::Or {
                let mut any_table = false;
                let mut found = false;
                while index < self.terms.len() && self.terms[index].oper == Oper::Or {
                    let term = &self.terms[index];
                    if term.is_table_term() {
                        any_table = true;
                        found |= has(term.id);
                    }
                    index += 1;
                }

                if any_table && !found {
                    return false;
                }
                continue;
            }

            if term.is_table_term() {
                match term.oper {
                    Oper::Not if has(term.id) => return false,
                    Oper::And if !has(term.id) => return false,
                    _ => {}
                }
            }

            index += 1;
        }

        true
    }
}

/// A signature plus the tables it currently matches.
#[derive(Debug, Clone)]
pub struct Query {
    signature: Signature,
    matched: Vec<ArchetypeId>,
    scanned: usize,
}

impl Query {
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            matched: Vec::new(),
            scanned: 0,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Matched tables, empty ones included.
    pub fn matched(&self) -> &[ArchetypeId] {
        &self.matched
    }

    /// Matches tables created since the last call.
    pub fn update(&mut self, archetypes: &Archetypes) {
        if !self.signature.needs_tables() {
            return;
        }

        for archetype in archetypes.iter().skip(self.scanned) {
            if self.signature.matches(archetype.bitset()) {
                self.matched.push(archetype.id());
            }
        }

        self.scanned = archetypes.len();
    }

    /// Whether the query currently has work: at least one matched table with
    /// entities in it. Queries that need no tables always have work.
    pub fn is_active(&self, archetypes: &Archetypes) -> bool {
        !self.signature.needs_tables()
            || self
                .matched
                .iter()
                .any(|id| !archetypes[*id].is_empty())
    }
}

/// Extra table constraints applied on top of a query when running a system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    include: Vec<ComponentId>,
    exclude: Vec<ComponentId>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, id: ComponentId) -> Self {
        self.include.push(id);
        self
    }

    pub fn exclude(mut self, id: ComponentId) -> Self {
        self.exclude.push(id);
        self
    }

    pub fn matches(&self, components: &FixedBitSet) -> bool {
        self.include.iter().all(|id| components.contains(id.to_usize()))
            && !self.exclude.iter().any(|id| components.contains(id.to_usize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(ids: &[u32]) -> FixedBitSet {
        let mut bits = FixedBitSet::with_capacity(16);
        ids.iter().for_each(|id| bits.insert(*id as usize));
        bits
    }

    const A: ComponentId = ComponentId(0);
    const B: ComponentId = ComponentId(1);
    const C: ComponentId = ComponentId(2);

    #[test]
    fn and_not_terms() {
        let signature = Signature::new().read(A).with(Term::read(B).not());

        assert!(signature.matches(&bits(&[0])));
        assert!(signature.matches(&bits(&[0, 2])));
        assert!(!signature.matches(&bits(&[0, 1])));
        assert!(!signature.matches(&bits(&[2])));
    }

    #[test]
    fn or_group_needs_one_member() {
        let signature = Signature::new()
            .with(Term::read(A).or())
            .with(Term::read(B).or())
            .read(C);

        assert!(signature.matches(&bits(&[0, 2])));
        assert!(signature.matches(&bits(&[1, 2])));
        assert!(!signature.matches(&bits(&[2])));
        assert!(!signature.matches(&bits(&[0, 1])));
    }

    #[test]
    fn empty_and_parent_terms_are_not_matched() {
        let signature = Signature::new()
            .read(A)
            .with(Term::write(B).empty())
            .with(Term::read(C).source(Source::Parent));

        assert!(signature.matches(&bits(&[0])));
        assert!(signature.needs_tables());
        assert!(!Signature::new().with(Term::write(B).empty()).needs_tables());
    }

    #[test]
    fn out_detection_and_inputs() {
        let reader = Signature::new().read(A).read(B);
        let writer = Signature::new().read(A).write(B);

        assert!(!reader.has_out());
        assert!(writer.has_out());
        assert_eq!(writer.inputs().collect::<Vec<_>>(), vec![A]);
    }

    #[test]
    fn filter_include_exclude() {
        let filter = Filter::new().include(A).exclude(C);

        assert!(filter.matches(&bits(&[0, 1])));
        assert!(!filter.matches(&bits(&[0, 2])));
        assert!(!filter.matches(&bits(&[1])));
    }
}
