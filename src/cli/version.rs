/// Display version information
pub fn execute() {
    println!("mirrorshard {}", env!("CARGO_PKG_VERSION"));
    println!("Threshold fragmentation and distributed reconstruction");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_execute() {
        execute();
    }
}
