//! Binary combine operations and the fixed-order wrapper
//!
//! A [`Combiner`] folds two partial results into one. Built-in operations
//! know their identity element. Closures are combiners too but have none.
//!
//! [`CombinerHandle`] is what the dispatcher actually holds: either the raw
//! operation or the operation wrapped in a [`FixedOrderWrapper`], which marks
//! it as requiring a schedule-independent merge order. The wrapper never
//! changes the values produced by a single `combine` call.

use crate::properties::ExecutionPlan;
use std::ops::{Add, BitAnd as BitAndOp, BitOr as BitOrOp, BitXor as BitXorOp, Mul, Not};

/// Associative binary operation over `T`
///
/// Implemented for every `Fn(T, T) -> T + Send + Sync` closure.
///
/// # Example
///
/// ```rust
/// use offload_core::combiner::{Combiner, Maximum, Plus};
///
/// assert_eq!(Plus.combine(2, 3), 5);
/// assert_eq!(Combiner::<f32>::identity(&Maximum), Some(f32::NEG_INFINITY));
///
/// let saturating = |a: u8, b: u8| a.saturating_add(b);
/// assert_eq!(saturating.combine(200, 100), 255);
/// assert_eq!(Combiner::<u8>::identity(&saturating), None);
/// ```
pub trait Combiner<T>: Send + Sync {
    fn combine(&self, a: T, b: T) -> T;

    /// Identity element, if the operation has a known one
    fn identity(&self) -> Option<T> {
        None
    }

    /// Operation name for logs and metrics
    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<T, F> Combiner<T> for F
where
    F: Fn(T, T) -> T + Send + Sync,
{
    fn combine(&self, a: T, b: T) -> T {
        self(a, b)
    }
}

/// Numeric primitives accepted by the arithmetic built-ins
pub trait Numeric: Copy + PartialOrd + Send + Sync + 'static + Add<Output = Self> + Mul<Output = Self> {
    const ZERO: Self;
    const ONE: Self;
    /// Identity of [`Maximum`]
    const LOWEST: Self;
    /// Identity of [`Minimum`]
    const HIGHEST: Self;
}

/// Integer primitives accepted by the bitwise built-ins
pub trait Integral:
    Numeric + BitAndOp<Output = Self> + BitOrOp<Output = Self> + BitXorOp<Output = Self> + Not<Output = Self>
{
}

macro_rules! impl_integral {
    ($($ty:ty),*) => {$(
        impl Numeric for $ty {
            const ZERO: Self = 0;
            const ONE: Self = 1;
            const LOWEST: Self = <$ty>::MIN;
            const HIGHEST: Self = <$ty>::MAX;
        }

        impl Integral for $ty {}
    )*};
}

macro_rules! impl_float {
    ($($ty:ty),*) => {$(
        impl Numeric for $ty {
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;
            const LOWEST: Self = <$ty>::NEG_INFINITY;
            const HIGHEST: Self = <$ty>::INFINITY;
        }
    )*};
}

impl_integral!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);
impl_float!(f32, f64);

/// Addition; identity `0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plus;

/// Multiplication; identity `1`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Multiplies;

/// Smaller of two values; identity is the type's highest value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Minimum;

/// Larger of two values; identity is the type's lowest value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Maximum;

/// Bitwise AND; identity all ones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitAnd;

/// Bitwise OR; identity `0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitOr;

/// Bitwise XOR; identity `0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitXor;

macro_rules! builtin {
    ($op:ident, $bound:ident, $name:literal, |$a:ident, $b:ident| $combine:expr, $identity:expr) => {
        impl<T: $bound> Combiner<T> for $op {
            #[inline]
            fn combine(&self, $a: T, $b: T) -> T {
                $combine
            }

            fn identity(&self) -> Option<T> {
                Some($identity)
            }

            fn name(&self) -> &'static str {
                $name
            }
        }
    };
}

builtin!(Plus, Numeric, "plus", |a, b| a + b, T::ZERO);
builtin!(Multiplies, Numeric, "multiplies", |a, b| a * b, T::ONE);
builtin!(Minimum, Numeric, "minimum", |a, b| if b < a { b } else { a }, T::HIGHEST);
builtin!(Maximum, Numeric, "maximum", |a, b| if b > a { b } else { a }, T::LOWEST);
builtin!(BitAnd, Integral, "bit_and", |a, b| a & b, !T::ZERO);
builtin!(BitOr, Integral, "bit_or", |a, b| a | b, T::ZERO);
builtin!(BitXor, Integral, "bit_xor", |a, b| a ^ b, T::ZERO);

/// Reports whether a combiner requires a fixed merge order
pub trait OrderTag {
    fn enforces_order(&self) -> bool;
}

/// Marks an operation as requiring a schedule-independent merge order
///
/// Owns the operation and delegates every call to it unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedOrderWrapper<Op> {
    op: Op,
}

impl<Op> FixedOrderWrapper<Op> {
    pub const fn new(op: Op) -> Self {
        Self { op }
    }

    pub fn inner(&self) -> &Op {
        &self.op
    }

    pub fn into_inner(self) -> Op {
        self.op
    }
}

impl<T, Op: Combiner<T>> Combiner<T> for FixedOrderWrapper<Op> {
    #[inline]
    fn combine(&self, a: T, b: T) -> T {
        self.op.combine(a, b)
    }

    fn identity(&self) -> Option<T> {
        self.op.identity()
    }

    fn name(&self) -> &'static str {
        self.op.name()
    }
}

impl<Op> OrderTag for FixedOrderWrapper<Op> {
    fn enforces_order(&self) -> bool {
        true
    }
}

/// The combiner a dispatch runs with
///
/// # Example
///
/// ```rust
/// use offload_core::combiner::{CombinerHandle, OrderTag, Plus};
/// use offload_core::properties::{resolve, PropertySet};
///
/// let plan = resolve(&PropertySet::deterministic());
/// let handle = CombinerHandle::new(Plus, &plan);
/// assert!(handle.enforces_order());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinerHandle<Op> {
    /// Partials may merge in any order
    Raw(Op),
    /// Partials merge in a fixed order
    FixedOrder(FixedOrderWrapper<Op>),
}

impl<Op> CombinerHandle<Op> {
    /// Wrap `op` as the plan requires
    pub fn new(op: Op, plan: &ExecutionPlan) -> Self {
        if plan.use_fixed_order_combine {
            CombinerHandle::FixedOrder(FixedOrderWrapper::new(op))
        } else {
            CombinerHandle::Raw(op)
        }
    }

    /// The wrapped operation
    pub fn op(&self) -> &Op {
        match self {
            CombinerHandle::Raw(op) => op,
            CombinerHandle::FixedOrder(wrapper) => wrapper.inner(),
        }
    }
}

impl<Op> OrderTag for CombinerHandle<Op> {
    fn enforces_order(&self) -> bool {
        match self {
            CombinerHandle::Raw(_) => false,
            CombinerHandle::FixedOrder(wrapper) => wrapper.enforces_order(),
        }
    }
}

impl<T, Op: Combiner<T>> Combiner<T> for CombinerHandle<Op> {
    #[inline]
    fn combine(&self, a: T, b: T) -> T {
        match self {
            CombinerHandle::Raw(op) => op.combine(a, b),
            CombinerHandle::FixedOrder(wrapper) => wrapper.combine(a, b),
        }
    }

    fn identity(&self) -> Option<T> {
        self.op().identity()
    }

    fn name(&self) -> &'static str {
        self.op().name()
    }
}
