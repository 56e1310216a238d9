use num_traits::PrimInt;

/// Constant buffer views must start on this boundary
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Shader tables records and their start addresses
pub const RAYTRACING_SHADER_RECORD_ALIGNMENT: u64 = 32;
pub const RAYTRACING_SHADER_TABLE_ALIGNMENT: u64 = 64;

/// Acceleration structure buffers must start on this boundary
pub const ACCELERATION_STRUCTURE_ALIGNMENT: u64 = 256;

/// Round `value` up to the next multiple of `alignment` (which must be a power of two)
pub fn align_up<T: PrimInt>(value: T, alignment: T) -> T {
    debug_assert!(alignment.count_ones() == 1);
    (value + alignment - T::one()) & !(alignment - T::one())
}

pub fn is_aligned<T: PrimInt>(value: T, alignment: T) -> bool {
    value & (alignment - T::one()) == T::zero()
}

/// Number of groups of `group_size` needed to cover `count` items
pub fn bucketize(count: u32, group_size: u32) -> u32 {
    (count + group_size - 1) / group_size
}

#[cfg(test)]
mod tests {
    use crate::utils::{align_up, bucketize, is_aligned};

    #[test]
    fn align_up_rounds_to_next_boundary() {
        assert_eq!(align_up(0u64, 256), 0);
        assert_eq!(align_up(1u64, 256), 256);
        assert_eq!(align_up(256u64, 256), 256);
        assert_eq!(align_up(257usize, 64), 320);
        assert!(is_aligned(512u64, 256));
        assert!(!is_aligned(300u64, 256));
    }

    #[test]
    fn bucketize_covers_remainder() {
        assert_eq!(bucketize(1920, 16), 120);
        assert_eq!(bucketize(1080, 16), 68);
        assert_eq!(bucketize(512, 512), 1);
        assert_eq!(bucketize(513, 512), 2);
    }
}
