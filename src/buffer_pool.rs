use tokio::sync::Mutex;

/// Size of every tunnel copy buffer
pub const BUF_SIZE: usize = 16_384;

const MAX_POOL_SIZE: usize = 64;

/// Buffer pool for tunnel copy loops backed by an async-aware mutex.
///
/// Each copy direction acquires one buffer when it starts and releases it
/// exactly once when it finishes; a released buffer must never be touched
/// again by the releaser.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a new, empty buffer pool
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(MAX_POOL_SIZE)),
        }
    }

    /// Get a buffer from the pool or allocate a fresh one
    pub async fn acquire(&self) -> Vec<u8> {
        let mut pool = self.buffers.lock().await;
        match pool.pop() {
            Some(mut buffer) => {
                debug_assert!(buffer.capacity() >= BUF_SIZE);
                buffer.resize(BUF_SIZE, 0);
                buffer
            }
            None => vec![0u8; BUF_SIZE],
        }
    }

    /// Return a buffer to the pool for reuse
    pub async fn release(&self, mut buffer: Vec<u8>) {
        // Reject buffers with the wrong capacity to avoid memory bloat
        if buffer.capacity() < BUF_SIZE || buffer.capacity() > BUF_SIZE * 2 {
            return;
        }

        // Zero the buffer on return to avoid leaking data between tunnels
        buffer.clear();
        buffer.resize(BUF_SIZE, 0);

        let mut pool = self.buffers.lock().await;
        if pool.len() < MAX_POOL_SIZE {
            pool.push(buffer);
        }
    }

    /// Number of buffers currently parked in the pool
    pub async fn available(&self) -> usize {
        self.buffers.lock().await.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Global buffer pool instance
static BUFFER_POOL: std::sync::OnceLock<BufferPool> = std::sync::OnceLock::new();

/// Get or initialize the global buffer pool
pub fn pool() -> &'static BufferPool {
    BUFFER_POOL.get_or_init(BufferPool::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_release_roundtrip() {
        let pool = BufferPool::new();

        let buf = pool.acquire().await;
        assert_eq!(buf.len(), BUF_SIZE);

        pool.release(buf).await;
        assert_eq!(pool.available().await, 1);

        let reused = pool.acquire().await;
        assert_eq!(reused.len(), BUF_SIZE);
        assert_eq!(pool.available().await, 0);
    }

    #[tokio::test]
    async fn test_pool_size_limit() {
        let pool = BufferPool::new();

        for _ in 0..(MAX_POOL_SIZE + 20) {
            pool.release(vec![0u8; BUF_SIZE]).await;
        }

        assert!(pool.available().await <= MAX_POOL_SIZE);
    }

    #[tokio::test]
    async fn test_wrong_size_rejection() {
        let pool = BufferPool::new();

        pool.release(vec![0u8; 1024]).await;
        assert_eq!(pool.available().await, 0);
    }

    #[tokio::test]
    async fn test_reused_buffer_is_zeroed_and_full_length() {
        let pool = BufferPool::new();

        let mut buf = pool.acquire().await;
        let capacity = buf.capacity();
        buf.fill(0xAA);
        buf.truncate(128);

        pool.release(buf).await;

        let reused = pool.acquire().await;
        assert_eq!(reused.len(), BUF_SIZE);
        assert_eq!(reused.capacity(), capacity);
        assert!(reused.iter().all(|&b| b == 0));
    }
}
