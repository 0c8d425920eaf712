/// Splits `items` into consecutive groups of at most `group_size`, keeping order.
/// The last group may be shorter. A zero group size is treated as one.
pub fn chunk<T: Clone>(items: &[T], group_size: usize) -> Vec<Vec<T>> {
    items.chunks(group_size.max(1)).map(<[T]>::to_vec).collect()
}

/// Number of groups `chunk` would produce for `len` items.
pub fn group_count(len: usize, group_size: usize) -> usize {
    len.div_ceil(group_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn last_group_is_the_remainder() {
        let groups = chunk(&[1, 2, 3, 4, 5, 6, 7], 3);
        assert_eq!(groups, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
        assert_eq!(group_count(7, 3), 3);
    }

    #[test]
    fn empty_input_has_no_groups() {
        let groups: Vec<Vec<u8>> = chunk(&[], 5);
        assert!(groups.is_empty());
        assert_eq!(group_count(0, 5), 0);
    }

    proptest! {
        #[test]
        fn concatenation_restores_input(items in prop::collection::vec(any::<u32>(), 0..200), k in 1usize..40) {
            let groups = chunk(&items, k);
            prop_assert!(groups.iter().all(|g| !g.is_empty() && g.len() <= k));
            prop_assert_eq!(groups.len(), group_count(items.len(), k));
            let flat: Vec<u32> = groups.into_iter().flatten().collect();
            prop_assert_eq!(flat, items);
        }
    }
}
