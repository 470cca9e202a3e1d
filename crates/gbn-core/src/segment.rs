use bytes::Bytes;
use gbn_abstract::MSS;

/// Split a resource into `MSS`-sized segments without copying. An empty
/// resource yields no segments; the transfer then consists of EOF alone.
pub fn segment(data: Bytes) -> Vec<Bytes> {
    (0..data.len())
        .step_by(MSS)
        .map(|start| data.slice(start..(start + MSS).min(data.len())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_resource_has_no_segments() {
        assert!(segment(Bytes::new()).is_empty());
    }

    #[test]
    fn last_segment_carries_the_remainder() {
        let data: Vec<u8> = (0..(2 * MSS + 5)).map(|i| i as u8).collect();
        let segments = segment(Bytes::from(data.clone()));
        let sizes: Vec<usize> = segments.iter().map(|s| s.len()).collect();
        assert_eq!(sizes, vec![MSS, MSS, 5]);
        assert_eq!(segments.concat(), data);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let segments = segment(Bytes::from(vec![7u8; 3 * MSS]));
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.len() == MSS));
    }
}
