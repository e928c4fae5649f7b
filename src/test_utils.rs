/// View a word-aligned arena as bytes.
pub fn words_as_bytes(words: &mut [u64]) -> &mut [u8] {
    let len = core::mem::size_of_val(words);
    // SAFETY: u8 has no alignment or validity requirements
    unsafe { core::slice::from_raw_parts_mut(words.as_mut_ptr().cast(), len) }
}
