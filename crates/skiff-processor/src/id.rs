use std::marker::PhantomData;

use uuid::Uuid;

use crate::error::{ProcessorError, ProcessorResult};

pub trait IdValueType: Sized {
    fn first() -> Self;
    fn next(v: Self) -> ProcessorResult<Self>;
}

macro_rules! impl_integer_id_value_type {
    ($type:ty) => {
        impl IdValueType for $type {
            fn first() -> Self {
                1
            }

            fn next(v: Self) -> ProcessorResult<Self> {
                v.checked_add(1)
                    .ok_or(ProcessorError::Internal("ID overflow".to_string()))
            }
        }
    };
}

impl_integer_id_value_type!(u64);

pub trait IdType: Sized {
    type Value: IdValueType + From<Self> + Into<Self>;
}

macro_rules! define_id_type {
    ($name:ident, $value_type:ty) => {
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
        pub struct $name($value_type);

        impl IdType for $name {
            type Value = $value_type;
        }

        impl From<$value_type> for $name {
            fn from(id: $value_type) -> Self {
                Self(id)
            }
        }

        impl From<$name> for $value_type {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id_type!(TaskId, u64);
define_id_type!(WorkerId, u64);

#[derive(Debug)]
pub struct IdGenerator<T: IdType> {
    next_value: T::Value,
    phantom: PhantomData<T>,
}

impl<T: IdType> IdGenerator<T>
where
    T::Value: Copy,
{
    pub fn new() -> Self {
        Self {
            next_value: T::Value::first(),
            phantom: PhantomData,
        }
    }

    pub fn next(&mut self) -> ProcessorResult<T> {
        let value = self.next_value;
        self.next_value = T::Value::next(value)?;
        Ok(value.into())
    }
}

/// A globally unique identifier for one processor instance.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ProcessorId(Uuid);

impl ProcessorId {
    pub(crate) fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generator_sequence() {
        let mut generator = IdGenerator::<TaskId>::new();
        assert_eq!(generator.next().unwrap(), TaskId::from(1));
        assert_eq!(generator.next().unwrap(), TaskId::from(2));
        assert_eq!(generator.next().unwrap(), TaskId::from(3));
    }

    #[test]
    fn test_id_generator_overflow() {
        let mut generator = IdGenerator::<WorkerId> {
            next_value: u64::MAX,
            phantom: PhantomData,
        };
        assert_eq!(generator.next().unwrap(), WorkerId::from(u64::MAX));
        assert!(generator.next().is_err());
    }

    #[test]
    fn test_processor_ids_are_unique() {
        assert_ne!(ProcessorId::random(), ProcessorId::random());
    }
}
