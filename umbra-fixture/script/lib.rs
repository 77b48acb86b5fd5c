use std::sync::atomic::{AtomicU32, Ordering};

/// Script side of the host's `Target` class.
#[uclass]
pub struct Target {
    #[uproperty(EditAnywhere)]
    pub health: f32,
    #[uproperty]
    pub last_sum: i32,
    #[uproperty]
    pub label: String,
    managed_adds: AtomicU32,
}

#[uclass_impl]
impl Target {
    #[constructor]
    fn init(&mut self) {
        self.health = 100.0;
        self.label = String::from("spawned");
    }

    #[ufunction(NativeEvent)]
    pub fn add(&self, a: i32, b: i32) -> i32 {
        self.managed_adds.fetch_add(1, Ordering::SeqCst);
        self.label = format!("{a}+{b}");
        a + b
    }

    #[ufunction(NativeEvent)]
    pub fn double(&self, value: &mut i32) {
        *value *= 2;
    }

    #[ufunction(NativeEvent)]
    pub fn swap(&self, left: &mut i32, right: &mut i32) {
        std::mem::swap(left, right);
    }

    pub fn managed_add_count(&self) -> u32 {
        self.managed_adds.load(Ordering::SeqCst)
    }
}
