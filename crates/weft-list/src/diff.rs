/// Indices into `seq` of one longest strictly increasing subsequence,
/// in order. Patience method: binary search over the smallest tail of each
/// length, with parent links to recover the chain.
pub(crate) fn longest_increasing(seq: &[usize]) -> Vec<usize> {
    if seq.is_empty() {
        return Vec::new();
    }
    // tails[l] = index of the smallest value ending a run of length l + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut parent: Vec<Option<usize>> = vec![None; seq.len()];
    for (i, &v) in seq.iter().enumerate() {
        let pos = tails.partition_point(|&t| seq[t] < v);
        if pos > 0 {
            parent[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }
    let mut out = Vec::with_capacity(tails.len());
    let mut cur = tails.last().copied();
    while let Some(i) = cur {
        out.push(i);
        cur = parent[i];
    }
    out.reverse();
    out
}
