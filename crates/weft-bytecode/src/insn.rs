//! Instruction lists
//!
//! Method bodies are kept as a list of [`Insn`] nodes rather than raw bytes,
//! so that rewriting passes can inspect and replace symbolic references and
//! move code between bodies. Branch targets are [`Label`] nodes whose
//! identity is local to one [`InsnList`].

use crate::opcode::Opcode;
use rustc_hash::FxHashMap;
use std::fmt;

/// A branch target, unique within one instruction list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Constant operand of LDC
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// 32-bit int
    Int(i32),
    /// 64-bit long
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit double
    Double(f64),
    /// String
    Str(String),
}

impl Constant {
    /// Stack words pushed when loaded
    pub fn slot_size(&self) -> u16 {
        match self {
            Self::Long(_) | Self::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Symbolic reference to a field or method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Internal name of the declaring class
    pub owner: String,
    /// Member name
    pub name: String,
    /// Field or method descriptor
    pub descriptor: String,
}

impl MemberRef {
    /// Create a member reference
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Same member, different owner
    pub fn with_owner(&self, owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// One node of a method body
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Opcode without operands
    Simple(Opcode),
    /// BIPUSH or SIPUSH
    Int {
        /// BIPUSH or SIPUSH
        opcode: Opcode,
        /// Immediate value
        value: i32,
    },
    /// LDC
    Ldc(Constant),
    /// Local load or store
    Var {
        /// xLOAD or xSTORE
        opcode: Opcode,
        /// Local slot
        slot: u16,
    },
    /// IINC
    Iinc {
        /// Local slot
        slot: u16,
        /// Increment
        delta: i16,
    },
    /// NEW, CHECKCAST or INSTANCEOF
    Type {
        /// Type opcode
        opcode: Opcode,
        /// Internal class name
        class: String,
    },
    /// Field access
    Field {
        /// GETFIELD, PUTFIELD, GETSTATIC or PUTSTATIC
        opcode: Opcode,
        /// Accessed field
        member: MemberRef,
    },
    /// Method invocation
    Method {
        /// INVOKE* opcode
        opcode: Opcode,
        /// Invoked method
        member: MemberRef,
    },
    /// Branch
    Jump {
        /// Branch opcode
        opcode: Opcode,
        /// Target label
        target: Label,
    },
    /// Branch target pseudo-node
    Label(Label),
    /// Source line pseudo-node
    Line(u32),
}

impl Insn {
    /// Opcode of a real instruction, None for pseudo-nodes
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Self::Simple(op) => Some(*op),
            Self::Int { opcode, .. }
            | Self::Var { opcode, .. }
            | Self::Type { opcode, .. }
            | Self::Field { opcode, .. }
            | Self::Method { opcode, .. }
            | Self::Jump { opcode, .. } => Some(*opcode),
            Self::Ldc(_) => Some(Opcode::Ldc),
            Self::Iinc { .. } => Some(Opcode::Iinc),
            Self::Label(_) | Self::Line(_) => None,
        }
    }

    /// Whether this node is a label or line marker
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Self::Label(_) | Self::Line(_))
    }

    /// Member reference of a field or method instruction
    pub fn member(&self) -> Option<&MemberRef> {
        match self {
            Self::Field { member, .. } | Self::Method { member, .. } => Some(member),
            _ => None,
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(op) => write!(f, "{}", op),
            Self::Int { opcode, value } => write!(f, "{} {}", opcode, value),
            Self::Ldc(c) => write!(f, "LDC {:?}", c),
            Self::Var { opcode, slot } => write!(f, "{} {}", opcode, slot),
            Self::Iinc { slot, delta } => write!(f, "IINC {} {}", slot, delta),
            Self::Type { opcode, class } => write!(f, "{} {}", opcode, class),
            Self::Field { opcode, member } | Self::Method { opcode, member } => {
                write!(f, "{} {}", opcode, member)
            }
            Self::Jump { opcode, target } => write!(f, "{} {}", opcode, target),
            Self::Label(label) => write!(f, "{}:", label),
            Self::Line(line) => write!(f, "LINE {}", line),
        }
    }
}

/// An ordered instruction list with its own label allocator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsnList {
    insns: Vec<Insn>,
    next_label: u32,
}

impl InsnList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from decoded nodes, reserving every label they mention
    pub fn from_vec(insns: Vec<Insn>) -> Self {
        let next_label = insns
            .iter()
            .filter_map(|insn| match insn {
                Insn::Label(l) | Insn::Jump { target: l, .. } => Some(l.0 + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Self { insns, next_label }
    }

    /// Allocate a fresh label (not yet placed)
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Append a node
    pub fn push(&mut self, insn: Insn) {
        if let Insn::Label(l) | Insn::Jump { target: l, .. } = &insn {
            self.next_label = self.next_label.max(l.0 + 1);
        }
        self.insns.push(insn);
    }

    /// Number of nodes, pseudo-nodes included
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    /// Whether the list has no nodes
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Node at an index
    pub fn get(&self, index: usize) -> Option<&Insn> {
        self.insns.get(index)
    }

    /// Iterate over all nodes
    pub fn iter(&self) -> std::slice::Iter<'_, Insn> {
        self.insns.iter()
    }

    /// Borrow the nodes as a slice
    pub fn as_slice(&self) -> &[Insn] {
        &self.insns
    }

    /// Consume the list
    pub fn into_vec(self) -> Vec<Insn> {
        self.insns
    }

    /// Number of real (non pseudo) instructions
    pub fn real_len(&self) -> usize {
        self.insns.iter().filter(|i| !i.is_pseudo()).count()
    }

    /// Append a copy of `source`, remapping its labels into this list and
    /// dropping nodes for which `keep` is false.
    pub fn append_copy(&mut self, source: &InsnList, keep: impl Fn(&Insn) -> bool) {
        let labels = LabelMap::new(source, self);
        for insn in source.iter().filter(|i| keep(i)) {
            self.push(labels.remap(insn));
        }
    }
}

impl<'a> IntoIterator for &'a InsnList {
    type Item = &'a Insn;
    type IntoIter = std::slice::Iter<'a, Insn>;

    fn into_iter(self) -> Self::IntoIter {
        self.insns.iter()
    }
}

impl FromIterator<Insn> for InsnList {
    fn from_iter<T: IntoIterator<Item = Insn>>(iter: T) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

/// One-to-one label translation from a source list into a destination list
///
/// Built once before copying so that every occurrence of a source label,
/// whether a definition or a branch target, maps to the same fresh label.
#[derive(Debug, Default)]
pub struct LabelMap {
    map: FxHashMap<Label, Label>,
}

impl LabelMap {
    /// Allocate a destination label for every label in `source`
    pub fn new(source: &InsnList, dest: &mut InsnList) -> Self {
        let mut map = FxHashMap::default();
        for insn in source {
            if let Insn::Label(l) | Insn::Jump { target: l, .. } = insn {
                map.entry(*l).or_insert_with(|| dest.new_label());
            }
        }
        Self { map }
    }

    /// Translate one label; labels outside the source map to themselves
    pub fn get(&self, label: Label) -> Label {
        self.map.get(&label).copied().unwrap_or(label)
    }

    /// Clone a node with its label operand translated
    pub fn remap(&self, insn: &Insn) -> Insn {
        match insn {
            Insn::Label(l) => Insn::Label(self.get(*l)),
            Insn::Jump { opcode, target } => Insn::Jump {
                opcode: *opcode,
                target: self.get(*target),
            },
            other => other.clone(),
        }
    }

    /// Number of mapped labels
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no labels were mapped
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looping_body() -> InsnList {
        let mut list = InsnList::new();
        let top = list.new_label();
        let out = list.new_label();
        list.push(Insn::Label(top));
        list.push(Insn::Var { opcode: Opcode::Iload, slot: 1 });
        list.push(Insn::Jump { opcode: Opcode::Ifeq, target: out });
        list.push(Insn::Iinc { slot: 1, delta: -1 });
        list.push(Insn::Jump { opcode: Opcode::Goto, target: top });
        list.push(Insn::Label(out));
        list.push(Insn::Simple(Opcode::Return));
        list
    }

    #[test]
    fn test_from_vec_reserves_labels() {
        let mut list = InsnList::from_vec(vec![
            Insn::Jump { opcode: Opcode::Goto, target: Label(7) },
            Insn::Label(Label(7)),
        ]);
        assert_eq!(list.new_label(), Label(8));
    }

    #[test]
    fn test_copies_do_not_share_labels() {
        let source = looping_body();
        let mut dest = InsnList::new();
        dest.append_copy(&source, |_| true);
        dest.append_copy(&source, |_| true);

        let defined: Vec<Label> = dest
            .iter()
            .filter_map(|i| match i {
                Insn::Label(l) => Some(*l),
                _ => None,
            })
            .collect();
        assert_eq!(defined.len(), 4);
        let mut unique = defined.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 4);

        // second copy's back-edge targets the second copy's loop head
        assert_eq!(dest.get(7), Some(&Insn::Label(defined[2])));
        assert_eq!(
            dest.get(11),
            Some(&Insn::Jump { opcode: Opcode::Goto, target: defined[2] })
        );
    }

    #[test]
    fn test_append_copy_filters() {
        let mut source = looping_body();
        source.push(Insn::Line(12));
        let mut dest = InsnList::new();
        dest.append_copy(&source, |i| !matches!(i, Insn::Line(_)));
        assert_eq!(dest.len(), source.len() - 1);
    }

    #[test]
    fn test_opcode_of_pseudo_nodes() {
        assert_eq!(Insn::Label(Label(0)).opcode(), None);
        assert_eq!(Insn::Line(3).opcode(), None);
        assert_eq!(Insn::Ldc(Constant::Long(1)).opcode(), Some(Opcode::Ldc));
    }
}
