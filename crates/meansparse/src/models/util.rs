//! # Shared Block Helpers
use bimm_contracts::unpack_shape_contract;

/// ``[out_height, out_width]`` of a strided layer over ``input_resolution``.
///
/// # Panics
///
/// If either side of `input_resolution` does not divide by `stride`.
pub fn strided_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    unpack_shape_contract!(
        [
            "in_height" = "out_height" * "stride",
            "in_width" = "out_width" * "stride"
        ],
        &input_resolution,
        &["out_height", "out_width"],
        &[("stride", stride)]
    )
}

/// Validate that a sequence of ``(in_planes, out_planes)`` pairs chains.
pub fn try_validate_chain<I>(planes: I) -> Result<(), String>
where
    I: IntoIterator<Item = (usize, usize)>,
{
    let planes: Vec<(usize, usize)> = planes.into_iter().collect();
    if planes.is_empty() {
        return Err("blocks is empty".to_string());
    }
    for idx in 1..planes.len() {
        let (_, prev_out) = planes[idx - 1];
        let (curr_in, _) = planes[idx];
        if prev_out != curr_in {
            return Err(format!(
                "block[{}].out_planes({}) != block[{}].in_planes({})",
                idx - 1,
                prev_out,
                idx,
                curr_in,
            ));
        }
    }
    Ok(())
}
