//! The type lattice.
//!
//! A [TypeRefMask] is a set of possible runtime shapes of a value. Each shape is a [TypeRef]
//! interned into a [TypeRefContext], which hands out one bit per shape. Joins are bitwise ors,
//! which gives us commutativity, associativity, idempotence and monotonicity for free. The
//! all-ones mask is the any-type (top); the empty mask is void (bottom, "nothing known yet").
//!
//! A handful of primitive shapes are interned ahead of time at fixed bits, so they can be used as
//! constants. Composite shapes (arrays of a given element type, named classes) are interned on
//! demand. A context can hold at most [MAX_TYPES] shapes; once it is full, new shapes degrade to
//! the any-type, which keeps every answer sound.
use crate::common::Name;

use hashbrown::HashMap;

use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const TYPE_BITS: u32 = 63;
pub const MAX_TYPES: usize = TYPE_BITS as usize;
const ANY_BITS: u64 = (1u64 << TYPE_BITS) - 1;
const REF_FLAG: u64 = 1u64 << TYPE_BITS;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct TypeRefMask(u64);

impl TypeRefMask {
    pub const VOID: TypeRefMask = TypeRefMask(0);
    pub const ANY: TypeRefMask = TypeRefMask(ANY_BITS);

    pub const NULL: TypeRefMask = TypeRefMask(1 << 0);
    pub const BOOL: TypeRefMask = TypeRefMask(1 << 1);
    pub const LONG: TypeRefMask = TypeRefMask(1 << 2);
    pub const DOUBLE: TypeRefMask = TypeRefMask(1 << 3);
    /// The overflow-safe numeric wrapper: an integer that may have been promoted.
    pub const NUMBER: TypeRefMask = TypeRefMask(1 << 4);
    pub const STRING: TypeRefMask = TypeRefMask(1 << 5);
    /// An array with unknown elements.
    pub const ARRAY: TypeRefMask = TypeRefMask(1 << 6);
    /// An object of unknown class.
    pub const OBJECT: TypeRefMask = TypeRefMask(1 << 7);
    pub const CLOSURE: TypeRefMask = TypeRefMask(1 << 8);
    pub const RESOURCE: TypeRefMask = TypeRefMask(1 << 9);

    /// The generic "number" union produced by arithmetic that may overflow.
    pub const NUMBERS: TypeRefMask =
        TypeRefMask(Self::LONG.0 | Self::DOUBLE.0 | Self::NUMBER.0);

    pub const fn from_bits(bits: u64) -> TypeRefMask {
        TypeRefMask(bits)
    }
    pub const fn bits(self) -> u64 {
        self.0
    }
    fn type_bits(self) -> u64 {
        self.0 & ANY_BITS
    }

    pub fn union(self, other: TypeRefMask) -> TypeRefMask {
        TypeRefMask(self.0 | other.0)
    }

    /// Removes the shapes of `other` from `self`. The any-type is left alone: we cannot enumerate
    /// what remains of it.
    pub fn remove(self, other: TypeRefMask) -> TypeRefMask {
        if self.is_any() {
            return self;
        }
        TypeRefMask(self.0 & !other.type_bits())
    }

    pub fn is_void(self) -> bool {
        self.type_bits() == 0
    }
    pub fn is_any(self) -> bool {
        self.type_bits() == ANY_BITS
    }
    pub fn is_ref(self) -> bool {
        self.0 & REF_FLAG != 0
    }
    pub fn with_ref_flag(self) -> TypeRefMask {
        TypeRefMask(self.0 | REF_FLAG)
    }
    pub fn without_ref_flag(self) -> TypeRefMask {
        TypeRefMask(self.type_bits())
    }

    /// Exactly one non-any shape.
    pub fn is_singleton(self) -> bool {
        self.type_bits().count_ones() == 1
    }

    /// Whether every shape of `self` is also a shape of `other`.
    pub fn is_subset_of(self, other: TypeRefMask) -> bool {
        other.is_any() || self.type_bits() & !other.type_bits() == 0
    }

    /// Whether `self` and `other` may describe the same value.
    pub fn intersects(self, other: TypeRefMask) -> bool {
        self.type_bits() & other.type_bits() != 0
    }

    fn iter_bits(self) -> impl Iterator<Item = usize> {
        let bits = self.type_bits();
        (0..MAX_TYPES).filter(move |i| bits & (1u64 << *i) != 0)
    }
}

impl std::ops::BitOr for TypeRefMask {
    type Output = TypeRefMask;
    fn bitor(self, other: TypeRefMask) -> TypeRefMask {
        self.union(other)
    }
}

impl std::ops::BitOrAssign for TypeRefMask {
    fn bitor_assign(&mut self, other: TypeRefMask) {
        *self = self.union(other)
    }
}

impl fmt::Debug for TypeRefMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_any() {
            write!(f, "TypeRefMask(any{})", if self.is_ref() { ", ref" } else { "" })
        } else {
            write!(f, "TypeRefMask({:#x})", self.0)
        }
    }
}

/// A single runtime shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Null,
    Bool,
    Long,
    Double,
    Number,
    String,
    /// An array whose values are described by the given mask.
    Array(TypeRefMask),
    Object,
    Class(Name),
    Closure,
    Resource,
}

/// Kinds queried by the transfer functions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Null,
    Bool,
    Long,
    Double,
    String,
    /// Integers, floats and the overflow-safe wrapper.
    Numeric,
    Array,
    Object,
    Closure,
    Resource,
}

impl TypeKind {
    /// The widest mask of this kind that does not depend on what has been interned.
    pub fn representative(self) -> TypeRefMask {
        match self {
            TypeKind::Null => TypeRefMask::NULL,
            TypeKind::Bool => TypeRefMask::BOOL,
            TypeKind::Long => TypeRefMask::LONG,
            TypeKind::Double => TypeRefMask::DOUBLE,
            TypeKind::String => TypeRefMask::STRING,
            TypeKind::Numeric => TypeRefMask::NUMBERS,
            TypeKind::Array => TypeRefMask::ARRAY,
            TypeKind::Object => TypeRefMask::OBJECT,
            TypeKind::Closure => TypeRefMask::CLOSURE,
            TypeKind::Resource => TypeRefMask::RESOURCE,
        }
    }
}

/// A type as written in source: a parameter type hint or a documentation comment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeHint {
    Mixed,
    Null,
    Bool,
    Int,
    Float,
    String,
    Array(Option<Box<TypeHint>>),
    Object,
    Callable,
    Class(Name),
    Nullable(Box<TypeHint>),
    Union(Vec<TypeHint>),
}

struct Table {
    refs: Vec<TypeRef>,
    index: HashMap<TypeRef, u32>,
    // Bits of all interned array and object shapes, kept up to date as we intern.
    arrays: u64,
    objects: u64,
}

/// The interning table for one compilation. Safe to share across threads: it is append-only, and
/// racing insertions of the same shape collapse to one bit.
pub struct TypeRefContext {
    table: RwLock<Table>,
}

impl Default for TypeRefContext {
    fn default() -> TypeRefContext {
        TypeRefContext::new()
    }
}

impl fmt::Debug for TypeRefContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TypeRefContext({:?})", self.read().refs)
    }
}

impl TypeRefContext {
    pub fn new() -> TypeRefContext {
        let res = TypeRefContext {
            table: RwLock::new(Table {
                refs: Vec::new(),
                index: HashMap::new(),
                arrays: 0,
                objects: 0,
            }),
        };
        // Order must match the constants on TypeRefMask.
        for tr in vec![
            TypeRef::Null,
            TypeRef::Bool,
            TypeRef::Long,
            TypeRef::Double,
            TypeRef::Number,
            TypeRef::String,
            TypeRef::Array(TypeRefMask::ANY),
            TypeRef::Object,
            TypeRef::Closure,
            TypeRef::Resource,
        ] {
            res.intern(tr);
        }
        debug_assert_eq!(res.len(), 10);
        res
    }

    // The table is append-only and every write leaves it consistent, so a poisoned lock still
    // guards valid data.
    fn read(&self) -> RwLockReadGuard<Table> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }
    fn write(&self) -> RwLockWriteGuard<Table> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }

    /// The number of interned shapes.
    pub fn len(&self) -> usize {
        self.read().refs.len()
    }

    /// Interns `tr`, returning its singleton mask, or the any-type if the context is full.
    pub fn intern(&self, tr: TypeRef) -> TypeRefMask {
        if let Some(ix) = self.read().index.get(&tr) {
            return TypeRefMask(1 << *ix);
        }
        let mut table = self.write();
        // Someone may have beaten us to it between the two locks.
        if let Some(ix) = table.index.get(&tr) {
            return TypeRefMask(1 << *ix);
        }
        if table.refs.len() >= MAX_TYPES {
            return TypeRefMask::ANY;
        }
        let ix = table.refs.len() as u32;
        match &tr {
            TypeRef::Array(_) => table.arrays |= 1 << ix,
            TypeRef::Object | TypeRef::Class(_) | TypeRef::Closure => table.objects |= 1 << ix,
            _ => {}
        }
        table.refs.push(tr.clone());
        table.index.insert(tr, ix);
        TypeRefMask(1 << ix)
    }

    pub fn class(&self, name: &str) -> TypeRefMask {
        self.intern(TypeRef::Class(name.into()))
    }

    /// An array holding values of type `elem`.
    ///
    /// Nested array shapes are flattened to the generic array so that repeated nesting cannot
    /// exhaust the table.
    pub fn array_of(&self, elem: TypeRefMask) -> TypeRefMask {
        let elem = elem.without_ref_flag();
        if elem.is_any() {
            return TypeRefMask::ARRAY;
        }
        let arrays = self.read().arrays;
        let elem = if elem.bits() & arrays != 0 {
            TypeRefMask(elem.bits() & !arrays) | TypeRefMask::ARRAY
        } else {
            elem
        };
        self.intern(TypeRef::Array(elem))
    }

    /// The type of `mask[key]`: the union of the element types of every array shape in `mask`,
    /// with strings indexing to strings and any other shape reading null. Void stays void: no
    /// value has reached the read yet.
    pub fn element_type_of(&self, mask: TypeRefMask) -> TypeRefMask {
        if mask.is_any() {
            return TypeRefMask::ANY;
        }
        if mask.is_void() {
            return TypeRefMask::VOID;
        }
        let table = self.read();
        let mut res = TypeRefMask::VOID;
        for ix in mask.iter_bits() {
            match &table.refs[ix] {
                TypeRef::Array(elem) => res |= *elem,
                TypeRef::String => res |= TypeRefMask::STRING,
                _ => res |= TypeRefMask::NULL,
            }
        }
        if res.is_void() {
            // reading from an empty array
            TypeRefMask::NULL
        } else {
            res
        }
    }

    /// Union of the element types of the array shapes in `mask`. Unlike [Self::element_type_of],
    /// empty arrays contribute nothing.
    pub fn array_elements(&self, mask: TypeRefMask) -> TypeRefMask {
        if mask.is_any() {
            return TypeRefMask::ANY;
        }
        let table = self.read();
        let mut res = TypeRefMask::VOID;
        for ix in mask.iter_bits() {
            if let TypeRef::Array(elem) = &table.refs[ix] {
                res |= *elem;
            }
        }
        res
    }

    /// The shapes of `mask` of the given kind. The any-type keeps all of them.
    pub fn restrict(&self, mask: TypeRefMask, kind: TypeKind) -> TypeRefMask {
        if mask.is_any() {
            return TypeRefMask::ANY;
        }
        TypeRefMask(mask.type_bits() & self.kind_bits(kind))
    }

    fn kind_bits(&self, kind: TypeKind) -> u64 {
        match kind {
            TypeKind::Null => TypeRefMask::NULL.bits(),
            TypeKind::Bool => TypeRefMask::BOOL.bits(),
            TypeKind::Long => TypeRefMask::LONG.bits(),
            TypeKind::Double => TypeRefMask::DOUBLE.bits(),
            TypeKind::String => TypeRefMask::STRING.bits(),
            TypeKind::Numeric => TypeRefMask::NUMBERS.bits(),
            TypeKind::Array => self.read().arrays,
            TypeKind::Object => self.read().objects,
            TypeKind::Closure => TypeRefMask::CLOSURE.bits(),
            TypeKind::Resource => TypeRefMask::RESOURCE.bits(),
        }
    }

    /// The mask of all shapes of the given kind interned so far.
    pub fn kind_mask(&self, kind: TypeKind) -> TypeRefMask {
        TypeRefMask(self.kind_bits(kind))
    }

    /// Whether every value described by `mask` is provably of `kind`. The any-type and void are
    /// never provably anything.
    pub fn is_kind(&self, mask: TypeRefMask, kind: TypeKind) -> bool {
        if mask.is_void() || mask.is_any() {
            return false;
        }
        mask.type_bits() & !self.kind_bits(kind) == 0
    }

    /// Whether some value described by `mask` may be of `kind`.
    pub fn can_be(&self, mask: TypeRefMask, kind: TypeKind) -> bool {
        mask.is_any() || mask.type_bits() & self.kind_bits(kind) != 0
    }

    /// The single shape of a singleton mask.
    pub fn singleton_ref(&self, mask: TypeRefMask) -> Option<TypeRef> {
        if !mask.is_singleton() {
            return None;
        }
        let ix = mask.type_bits().trailing_zeros() as usize;
        self.read().refs.get(ix).cloned()
    }

    /// Names of the named classes in `mask`, sorted.
    pub fn class_names(&self, mask: TypeRefMask) -> Vec<Name> {
        if mask.is_any() {
            return Vec::new();
        }
        let table = self.read();
        let mut res: Vec<Name> = mask
            .iter_bits()
            .filter_map(|ix| match &table.refs[ix] {
                TypeRef::Class(n) => Some(n.clone()),
                _ => None,
            })
            .collect();
        res.sort();
        res
    }

    pub fn from_hint(&self, hint: &TypeHint) -> TypeRefMask {
        match hint {
            TypeHint::Mixed => TypeRefMask::ANY,
            TypeHint::Null => TypeRefMask::NULL,
            TypeHint::Bool => TypeRefMask::BOOL,
            TypeHint::Int => TypeRefMask::LONG,
            TypeHint::Float => TypeRefMask::DOUBLE,
            TypeHint::String => TypeRefMask::STRING,
            TypeHint::Array(None) => TypeRefMask::ARRAY,
            TypeHint::Array(Some(elem)) => self.array_of(self.from_hint(elem)),
            TypeHint::Object => TypeRefMask::OBJECT,
            TypeHint::Callable => TypeRefMask::CLOSURE | TypeRefMask::STRING | TypeRefMask::ARRAY,
            TypeHint::Class(name) => self.class(name),
            TypeHint::Nullable(inner) => self.from_hint(inner) | TypeRefMask::NULL,
            TypeHint::Union(hints) => hints
                .iter()
                .fold(TypeRefMask::VOID, |acc, h| acc | self.from_hint(h)),
        }
    }

    /// Sorted names of every shape in `mask`. This does not depend on the order in which shapes
    /// were interned, so it doubles as a deterministic sort key.
    pub fn names(&self, mask: TypeRefMask) -> Vec<String> {
        if mask.is_any() {
            return vec!["mixed".into()];
        }
        let table = self.read();
        let mut res: Vec<String> = mask
            .iter_bits()
            .map(|ix| Self::ref_name(&table, &table.refs[ix]))
            .collect();
        res.sort();
        res
    }

    fn ref_name(table: &Table, tr: &TypeRef) -> String {
        match tr {
            TypeRef::Null => "null".into(),
            TypeRef::Bool => "bool".into(),
            TypeRef::Long => "int".into(),
            TypeRef::Double => "float".into(),
            TypeRef::Number => "number".into(),
            TypeRef::String => "string".into(),
            TypeRef::Array(elem) if elem.is_any() => "array".into(),
            TypeRef::Array(elem) if elem.is_void() => "array<void>".into(),
            TypeRef::Array(elem) => {
                let mut inner: Vec<String> = elem
                    .iter_bits()
                    .map(|ix| Self::ref_name(table, &table.refs[ix]))
                    .collect();
                inner.sort();
                format!("array<{}>", inner.join("|"))
            }
            TypeRef::Object => "object".into(),
            TypeRef::Class(name) => name.to_string(),
            TypeRef::Closure => "Closure".into(),
            TypeRef::Resource => "resource".into(),
        }
    }

    /// Renders `mask` for logs and tests, e.g. `int|null` or `&array<string>`.
    pub fn display(&self, mask: TypeRefMask) -> String {
        let body = if mask.is_void() {
            "void".to_string()
        } else {
            self.names(mask).join("|")
        };
        if mask.is_ref() {
            format!("&{}", body)
        } else {
            body
        }
    }
}
